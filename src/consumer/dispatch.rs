use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use super::client::{ConsumerEvent, DeliveryChannel};
use crate::artifact::Artifact;
use crate::realtime::SeenCache;
use crate::sanitize::scrub_artifact;

/// Outcome of a non-blocking hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Delivered,
    Duplicate,
    /// Event buffer full. The id is not remembered, so a later pull can still deliver it.
    Busy,
    Closed,
}

/// Single funnel from both channels to the application.
///
/// Every artifact is checked against one shared [`SeenCache`] first, so the
/// push and poll tasks can race freely without dispatching twice.
pub struct Dispatcher {
    seen: Mutex<SeenCache>,
    sanitize: bool,
    events: mpsc::Sender<ConsumerEvent>,
}

impl Dispatcher {
    pub fn new(dedup_window: usize, sanitize: bool, events: mpsc::Sender<ConsumerEvent>) -> Self {
        Self {
            seen: Mutex::new(SeenCache::new(dedup_window)),
            sanitize,
            events,
        }
    }

    /// Hand an artifact to the application unless it was already seen.
    ///
    /// Returns `true` when the artifact was dispatched.
    pub async fn dispatch(&self, mut artifact: Artifact, via: DeliveryChannel) -> bool {
        if !self.seen.lock().insert(&artifact.id) {
            trace!(id = %artifact.id, ?via, "duplicate artifact dropped");
            return false;
        }
        if self.sanitize {
            scrub_artifact(&mut artifact);
        }
        debug!(id = %artifact.id, ?via, "artifact received");
        self.events
            .send(ConsumerEvent::Artifact { artifact, via })
            .await
            .is_ok()
    }

    /// Like [`dispatch`](Self::dispatch) but never waits on the event buffer.
    ///
    /// The id is only remembered once the event is queued.
    pub fn try_dispatch(&self, mut artifact: Artifact, via: DeliveryChannel) -> Handoff {
        if self.sanitize {
            scrub_artifact(&mut artifact);
        }
        let mut seen = self.seen.lock();
        if seen.contains(&artifact.id) {
            // counts the duplicate
            seen.insert(&artifact.id);
            trace!(id = %artifact.id, ?via, "duplicate artifact dropped");
            return Handoff::Duplicate;
        }

        let id = artifact.id.clone();
        match self.events.try_send(ConsumerEvent::Artifact { artifact, via }) {
            Ok(()) => {
                seen.insert(&id);
                debug!(id = %id, ?via, "artifact received");
                Handoff::Delivered
            }
            Err(TrySendError::Full(_)) => {
                warn!(id = %id, ?via, "event buffer full, artifact left to the pull channel");
                Handoff::Busy
            }
            Err(TrySendError::Closed(_)) => Handoff::Closed,
        }
    }

    /// Forward a lifecycle event. A dropped receiver is not an error.
    pub async fn emit(&self, event: ConsumerEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn duplicates(&self) -> u64 {
        self.seen.lock().duplicates()
    }
}
