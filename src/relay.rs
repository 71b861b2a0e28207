use std::sync::Arc;

use tracing::{error, info, warn};

use crate::artifact::Artifact;
use crate::config::RelayConfig;
use crate::errors::RelayResult;
use crate::metrics::RelayMetrics;
use crate::realtime::{BroadcastConfig, ChangeLog, ChangeLogConfig, ChangeRecord, PushServer};
use crate::store::{pull_pending, ArtifactStore, MemoryStore, PostgresStore, PullOutcome, StoreError};

/// What a publish did on each channel
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub record: Arc<ChangeRecord>,
    /// Push connections the item was queued to
    pub delivered_count: usize,
    /// Whether the store accepted the artifact for the pull channel
    pub stored: bool,
}

/// Producer-facing facade tying the three delivery channels together.
///
/// Cheap to clone; every clone shares the same log, connection set and store.
#[derive(Clone)]
pub struct Relay {
    change_log: Arc<ChangeLog>,
    push: Arc<PushServer>,
    store: Arc<dyn ArtifactStore>,
    metrics: Arc<RelayMetrics>,
    pending_limit: usize,
}

impl Relay {
    pub fn new(
        change_log: ChangeLogConfig,
        push: BroadcastConfig,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        Self {
            change_log: Arc::new(ChangeLog::new(change_log).with_metrics(Arc::clone(&metrics))),
            push: Arc::new(PushServer::new(push).with_metrics(Arc::clone(&metrics))),
            store,
            metrics,
            pending_limit: 10,
        }
    }

    /// In-memory relay with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            ChangeLogConfig::default(),
            BroadcastConfig::default(),
            Arc::new(MemoryStore::new()),
        )
    }

    /// Build a relay from configuration, connecting to PostgreSQL when a URL is set.
    pub async fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let store: Arc<dyn ArtifactStore> = if config.store.is_configured() {
            let store = PostgresStore::connect(&config.store).await?;
            if config.store.create_schema {
                store.ensure_schema().await?;
            }
            Arc::new(store)
        } else {
            info!("no database configured, using in-memory artifact store");
            Arc::new(MemoryStore::new())
        };

        let push = BroadcastConfig {
            buffer_size: config.server.buffer_size,
        };
        Ok(Self::new(config.change_log.clone(), push, store)
            .with_pending_limit(config.store.pending_limit))
    }

    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit.max(1);
        self
    }

    /// Distribute a new artifact on every channel.
    ///
    /// The change log and the push fan-out never fail. A store failure is
    /// logged and reported in the receipt; the artifact is still pushed.
    pub async fn publish(&self, artifact: Artifact) -> PublishReceipt {
        let stored = match self.store.save(&artifact).await {
            Ok(()) => true,
            Err(e) => {
                error!(id = %artifact.id, store = self.store.name(), error = %e, "failed to persist artifact");
                false
            }
        };

        let record = self.change_log.record_change(artifact);
        let report = self.push.broadcast(&record);
        if report.delivered_count == 0 {
            warn!(sequence = record.sequence, "no push clients connected, artifact left to pull channel");
        }

        PublishReceipt {
            record,
            delivered_count: report.delivered_count,
            stored,
        }
    }

    /// Run one pull reconciliation against the store.
    pub async fn pull(&self, limit: Option<usize>) -> Result<PullOutcome, StoreError> {
        let limit = limit.unwrap_or(self.pending_limit).max(1);
        pull_pending(self.store.as_ref(), limit, Some(&self.metrics)).await
    }

    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.change_log
    }

    pub fn push(&self) -> &Arc<PushServer> {
        &self.push
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn pending_limit(&self) -> usize {
        self.pending_limit
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("change_log", &self.change_log)
            .field("push", &self.push)
            .field("store", &self.store.name())
            .field("pending_limit", &self.pending_limit)
            .finish()
    }
}
