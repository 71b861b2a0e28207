use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{flagged_or_recent, ArtifactStore, PendingBatch, StoreError};
use crate::artifact::Artifact;

#[derive(Debug, Clone)]
struct StoredArtifact {
    artifact: Artifact,
    delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
}

/// In-process store, used when no database is configured and in tests.
///
/// Built with [`MemoryStore::without_flag`] it behaves like a schema that
/// lacks the delivery column: the flagged query fails with
/// [`StoreError::MissingColumn`] and pulls fall back to the most recent rows.
#[derive(Debug)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredArtifact>>,
    has_flag: bool,
    fail_marks: AtomicBool,
    fail_fetches: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            has_flag: true,
            fail_marks: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
        }
    }

    pub fn without_flag() -> Self {
        Self {
            has_flag: false,
            ..Self::new()
        }
    }

    /// Make every following `mark_delivered` fail
    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::Relaxed);
    }

    /// Make every following `fetch_pending` fail
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn is_delivered(&self, id: &str) -> Option<bool> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.artifact.id == id)
            .map(|r| r.delivered)
    }

    pub fn delivered_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.artifact.id == id)
            .and_then(|r| r.delivered_at)
    }
}

impl MemoryStore {
    fn fetch_flagged(&self, limit: usize) -> Result<Vec<Artifact>, StoreError> {
        if !self.has_flag {
            return Err(StoreError::MissingColumn("delivered".into()));
        }
        let rows = self.rows.lock();
        let mut pending: Vec<&StoredArtifact> = rows.iter().filter(|r| !r.delivered).collect();
        pending.sort_by_key(|r| r.artifact.created_at);
        Ok(pending.into_iter().take(limit).map(|r| r.artifact.clone()).collect())
    }

    fn fetch_recent(&self, limit: usize) -> Vec<Artifact> {
        let rows = self.rows.lock();
        let mut recent: Vec<&StoredArtifact> = rows.iter().collect();
        recent.sort_by(|a, b| b.artifact.created_at.cmp(&a.artifact.created_at));
        recent.into_iter().take(limit).map(|r| r.artifact.clone()).collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn fetch_pending(&self, limit: usize) -> Result<PendingBatch, StoreError> {
        if self.fail_fetches.load(Ordering::Relaxed) {
            return Err(StoreError::Rejected("memory store fetch disabled".into()));
        }
        flagged_or_recent(self.name(), async { self.fetch_flagged(limit) }, || async {
            Ok::<_, StoreError>(self.fetch_recent(limit))
        })
        .await
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError> {
        if !self.has_flag {
            return Err(StoreError::MissingColumn("delivered".into()));
        }
        if self.fail_marks.load(Ordering::Relaxed) {
            return Err(StoreError::Rejected("memory store marking disabled".into()));
        }

        let now = Utc::now();
        let mut updated = 0;
        for row in self.rows.lock().iter_mut() {
            if !row.delivered && ids.contains(&row.artifact.id) {
                row.delivered = true;
                row.delivered_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn save(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        if rows.iter().any(|r| r.artifact.id == artifact.id) {
            return Err(StoreError::Rejected(format!(
                "artifact {} already stored",
                artifact.id
            )));
        }
        rows.push(StoredArtifact {
            artifact: artifact.clone(),
            delivered: false,
            delivered_at: None,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn artifact(id: &str, minutes_ago: i64) -> Artifact {
        Artifact::from_value(json!({ "id": id }))
            .unwrap()
            .with_created_at(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_pending_oldest_first() {
        let store = MemoryStore::new();
        store.save(&artifact("new", 1)).await.unwrap();
        store.save(&artifact("old", 10)).await.unwrap();

        let batch = store.fetch_pending(10).await.unwrap();
        assert!(batch.uses_flag);
        let ids: Vec<_> = batch.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_mark_delivered_flips_once() {
        let store = MemoryStore::new();
        store.save(&artifact("a", 1)).await.unwrap();

        assert_eq!(store.mark_delivered(&["a".to_string()]).await.unwrap(), 1);
        assert_eq!(store.mark_delivered(&["a".to_string()]).await.unwrap(), 0);
        assert_eq!(store.is_delivered("a"), Some(true));
        assert!(store.delivered_at("a").is_some());
        assert!(store.fetch_pending(10).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_without_flag_returns_most_recent() {
        let store = MemoryStore::without_flag();
        for (id, age) in [("a", 30), ("b", 20), ("c", 10)] {
            store.save(&artifact(id, age)).await.unwrap();
        }

        let batch = store.fetch_pending(2).await.unwrap();
        assert!(!batch.uses_flag);
        let ids: Vec<_> = batch.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!(store.mark_delivered(&["c".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_save_rejected() {
        let store = MemoryStore::new();
        store.save(&artifact("a", 1)).await.unwrap();
        assert!(store.save(&artifact("a", 1)).await.is_err());
        assert_eq!(store.len(), 1);
    }
}
