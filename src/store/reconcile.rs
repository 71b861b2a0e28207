use tracing::{debug, error};

use super::{ArtifactStore, StoreError};
use crate::artifact::Artifact;
use crate::metrics::RelayMetrics;

/// What a pull hands back to the consumer
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    pub items: Vec<Artifact>,
    pub uses_flag: bool,
    /// Rows actually flipped to delivered (0 in degraded mode or on mark failure)
    pub marked: u64,
}

/// Fetch undelivered artifacts and flag them delivered.
///
/// A marking failure is logged and counted but never withholds the fetched
/// items; the next pull may hand them out again, which consumers absorb by
/// deduplicating on artifact id.
pub async fn pull_pending(
    store: &dyn ArtifactStore,
    limit: usize,
    metrics: Option<&RelayMetrics>,
) -> Result<PullOutcome, StoreError> {
    let batch = store.fetch_pending(limit).await?;
    let mut marked = 0;

    if batch.uses_flag && !batch.items.is_empty() {
        let ids: Vec<String> = batch.items.iter().map(|a| a.id.clone()).collect();
        match store.mark_delivered(&ids).await {
            Ok(n) => marked = n,
            Err(e) => {
                error!(store = store.name(), count = ids.len(), error = %e, "failed to mark artifacts delivered");
                if let Some(metrics) = metrics {
                    metrics.record_mark_failure();
                }
            }
        }
    }

    if let Some(metrics) = metrics {
        metrics.record_pull(batch.items.len() as u64);
    }
    debug!(
        store = store.name(),
        count = batch.items.len(),
        uses_flag = batch.uses_flag,
        marked,
        "pull reconciled"
    );

    Ok(PullOutcome {
        items: batch.items,
        uses_flag: batch.uses_flag,
        marked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn seeded(store: &MemoryStore, ids: &[&str]) {
        for id in ids {
            let a = Artifact::from_value(json!({ "id": id })).unwrap();
            store.save(&a).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_second_pull_is_empty() {
        let store = MemoryStore::new();
        seeded(&store, &["a", "b"]).await;

        let first = pull_pending(&store, 10, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.uses_flag);
        assert_eq!(first.marked, 2);

        let second = pull_pending(&store, 10, None).await.unwrap();
        assert!(second.items.is_empty());
    }

    #[tokio::test]
    async fn test_limit_leaves_rest_pending() {
        let store = MemoryStore::new();
        seeded(&store, &["a", "b", "c"]).await;

        assert_eq!(pull_pending(&store, 2, None).await.unwrap().items.len(), 2);
        assert_eq!(pull_pending(&store, 2, None).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_failure_still_returns_items() {
        let store = MemoryStore::new();
        seeded(&store, &["a"]).await;
        store.set_fail_marks(true);
        let metrics = RelayMetrics::new();

        let outcome = pull_pending(&store, 10, Some(&metrics)).await.unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.marked, 0);
        assert_eq!(metrics.snapshot().mark_failures, 1);

        // Not flagged, so the next pull re-delivers.
        store.set_fail_marks(false);
        assert_eq!(pull_pending(&store, 10, None).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_store_skips_marking() {
        let store = MemoryStore::without_flag();
        seeded(&store, &["a"]).await;
        let metrics = RelayMetrics::new();

        let outcome = pull_pending(&store, 10, Some(&metrics)).await.unwrap();
        assert!(!outcome.uses_flag);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(metrics.snapshot().mark_failures, 0);

        let again = pull_pending(&store, 10, None).await.unwrap();
        assert_eq!(again.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let store = MemoryStore::new();
        store.set_fail_fetches(true);
        assert!(pull_pending(&store, 10, None).await.is_err());
    }
}
