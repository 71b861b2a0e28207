//! Persistent flag store adapter.
//!
//! The pull channel reads undelivered artifacts from a store and flips
//! their `delivered` flag once handed out. Stores without that column run
//! in degraded mode and always return the most recent artifacts.

pub mod memory;
pub mod postgres;
pub mod reconcile;

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::artifact::Artifact;

pub use memory::MemoryStore;
pub use postgres::{PostgresStore, StoreConfig};
pub use reconcile::{pull_pending, PullOutcome};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("delivery flag column `{0}` does not exist")]
    MissingColumn(String),

    #[error("failed to decode stored artifact {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("store rejected the operation: {0}")]
    Rejected(String),
}

/// Artifacts returned by a pending fetch
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    pub items: Vec<Artifact>,
    /// `false` when the store has no delivery flag and the items are just the most recent ones
    pub uses_flag: bool,
}

/// Runs the flagged query and, if the delivery column does not exist,
/// falls back to `recent` with `uses_flag = false`.
pub async fn flagged_or_recent<F, R, Fut>(
    store: &str,
    flagged: F,
    recent: R,
) -> Result<PendingBatch, StoreError>
where
    F: Future<Output = Result<Vec<Artifact>, StoreError>>,
    R: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Artifact>, StoreError>>,
{
    match flagged.await {
        Ok(items) => Ok(PendingBatch {
            items,
            uses_flag: true,
        }),
        Err(StoreError::MissingColumn(column)) => {
            warn!(store, %column, "delivery flag column missing, serving most recent artifacts");
            Ok(PendingBatch {
                items: recent().await?,
                uses_flag: false,
            })
        }
        Err(e) => Err(e),
    }
}

/// External collaborator backing the pull channel.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Undelivered artifacts, oldest first, at most `limit`.
    ///
    /// Falls back to the most recent `limit` artifacts with
    /// `uses_flag = false` when the schema lacks the delivery flag.
    async fn fetch_pending(&self, limit: usize) -> Result<PendingBatch, StoreError>;

    /// Flag the given artifacts as delivered. Returns the number of rows flipped.
    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError>;

    /// Persist a newly produced artifact.
    async fn save(&self, artifact: &Artifact) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}
