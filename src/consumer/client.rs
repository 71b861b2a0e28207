use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use super::dispatch::Dispatcher;
use super::push::PushSession;
use super::state::{ConnectionEvent, ConnectionState};
use super::{poll, ConsumerConfig};
use crate::artifact::Artifact;
use crate::errors::RelayResult;

/// Which channel delivered an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Push,
    Pull,
}

/// Everything the application hears from a running consumer
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    Connected,
    Disconnected { reason: String },
    Artifact { artifact: Artifact, via: DeliveryChannel },
    /// Push reconnects exhausted. The poll loop keeps running.
    GaveUp { attempts: u32 },
}

/// Consumer of a relay: push session plus poll loop.
///
/// ```no_run
/// # async fn demo() -> artifact_relay::errors::RelayResult<()> {
/// use artifact_relay::consumer::{ConsumerClient, ConsumerConfig, ConsumerEvent};
///
/// let mut handle = ConsumerClient::new(ConsumerConfig::default())?.connect();
/// while let Some(event) = handle.events().recv().await {
///     if let ConsumerEvent::Artifact { artifact, via } = event {
///         println!("{} via {:?}", artifact.id, via);
///     }
/// }
/// handle.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerClient {
    config: ConsumerConfig,
    http: reqwest::Client,
}

impl ConsumerClient {
    pub fn new(config: ConsumerConfig) -> RelayResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Spawn the push session and, if enabled, the poll loop.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn connect(self) -> ConsumerHandle {
        let config = Arc::new(self.config);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let state_tx = Arc::new(state_tx);

        let dispatcher = Arc::new(Dispatcher::new(
            config.dedup_window,
            config.sanitize,
            events_tx,
        ));

        let mut tasks = Vec::with_capacity(2);
        let session = PushSession::new(
            Arc::clone(&config),
            self.http.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&state_tx),
        );
        tasks.push(tokio::spawn(session.run(shutdown_rx.clone())));

        if config.poll_enabled {
            tasks.push(tokio::spawn(poll::run(
                Arc::clone(&config),
                self.http,
                dispatcher,
                shutdown_rx,
            )));
        }

        info!(
            server_url = %config.server_url,
            api_base = %config.api_base,
            client_id = ?config.client_id,
            "consumer started"
        );

        ConsumerHandle {
            events: events_rx,
            state: state_rx,
            state_tx,
            shutdown: shutdown_tx,
            policy: config.reconnect_policy(),
            tasks,
        }
    }
}

/// Handle to a running consumer
pub struct ConsumerHandle {
    events: mpsc::Receiver<ConsumerEvent>,
    state: watch::Receiver<ConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    policy: super::ReconnectPolicy,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn events(&mut self) -> &mut mpsc::Receiver<ConsumerEvent> {
        &mut self.events
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop both tasks and wait for them to finish.
    ///
    /// Pending events are discarded. Returns the final state, which is
    /// always [`Phase::Disconnected`](super::Phase::Disconnected).
    pub async fn disconnect(self) -> ConnectionState {
        let ConsumerHandle {
            events,
            state,
            state_tx,
            shutdown,
            policy,
            tasks,
        } = self;

        let _ = shutdown.send(true);
        // Unblocks a task parked on a full event channel.
        drop(events);
        for task in tasks {
            let _ = task.await;
        }

        // A session that already gave up has exited without seeing the signal.
        state_tx.send_modify(|s| {
            s.apply(ConnectionEvent::Disconnect, &policy);
        });
        info!("consumer disconnected");
        let final_state = state.borrow().clone();
        final_state
    }
}
