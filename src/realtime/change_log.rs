use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::metrics::RelayMetrics;

/// Kind of change carried by a [`ChangeRecord`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    NewItem,
}

/// One enqueued change. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub kind: ChangeKind,
    pub payload: Artifact,
}

/// What to do when an outbox is already at capacity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest unacknowledged record (default)
    #[default]
    DropOldest,
    /// Keep the outbox as is and skip the new record
    DropNewest,
}

/// Configuration for the change log
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeLogConfig {
    /// Maximum number of unacknowledged records kept per consumer
    pub capacity: usize,
    /// Overflow policy
    pub overflow: OverflowPolicy,
}

impl Default for ChangeLogConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Result of a `get_changes` read
#[derive(Clone, Debug)]
pub struct ChangeBatch {
    pub records: Vec<Arc<ChangeRecord>>,
    pub latest_sequence: u64,
}

/// Read-only snapshot of the log
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogStats {
    #[serde(rename = "totalClients")]
    pub consumer_count: usize,
    pub global_sequence: u64,
    #[serde(rename = "pendingChanges")]
    pub total_pending: usize,
}

struct ChangeLogInner {
    sequence: u64,
    outboxes: HashMap<String, VecDeque<Arc<ChangeRecord>>>,
}

/// Per-consumer sequenced change log with acknowledgment-based pruning.
///
/// The counter and every outbox sit behind one lock, so assigning a
/// sequence and appending it everywhere is a single step and each outbox
/// stays in strictly increasing sequence order.
///
/// Example:
///     let log = ChangeLog::new(ChangeLogConfig::default());
///     log.register_consumer("unity-1");
///     log.record_change(artifact);
///     let batch = log.get_changes("unity-1", 0);
///     log.acknowledge("unity-1", batch.latest_sequence);
pub struct ChangeLog {
    config: ChangeLogConfig,
    inner: Mutex<ChangeLogInner>,
    metrics: Option<Arc<RelayMetrics>>,
}

impl ChangeLog {
    pub fn new(config: ChangeLogConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(ChangeLogInner {
                sequence: 0,
                outboxes: HashMap::new(),
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ChangeLogConfig {
        &self.config
    }

    /// Enqueue a new artifact for every registered consumer.
    ///
    /// Never fails. Consumers that register later do not see this record.
    pub fn record_change(&self, artifact: Artifact) -> Arc<ChangeRecord> {
        let capacity = self.config.capacity.max(1);
        let mut evicted = 0u64;

        let record = {
            let mut inner = self.inner.lock();
            inner.sequence += 1;
            let record = Arc::new(ChangeRecord {
                sequence: inner.sequence,
                created_at: Utc::now(),
                kind: ChangeKind::NewItem,
                payload: artifact,
            });

            for (consumer_id, outbox) in inner.outboxes.iter_mut() {
                if outbox.len() >= capacity {
                    evicted += 1;
                    match self.config.overflow {
                        OverflowPolicy::DropOldest => {
                            if let Some(lost) = outbox.pop_front() {
                                warn!(
                                    consumer = %consumer_id,
                                    sequence = lost.sequence,
                                    capacity,
                                    "outbox full, evicted oldest unacknowledged change"
                                );
                            }
                        }
                        OverflowPolicy::DropNewest => {
                            warn!(
                                consumer = %consumer_id,
                                sequence = record.sequence,
                                capacity,
                                "outbox full, change not enqueued"
                            );
                            continue;
                        }
                    }
                }
                outbox.push_back(Arc::clone(&record));
            }
            record
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_change();
            if evicted > 0 {
                metrics.record_evictions(evicted);
            }
        }
        debug!(sequence = record.sequence, id = %record.payload.id, "change recorded");
        record
    }

    /// Create an empty outbox for `consumer_id` if it has none yet
    pub fn register_consumer(&self, consumer_id: &str) {
        let mut inner = self.inner.lock();
        if !inner.outboxes.contains_key(consumer_id) {
            inner.outboxes.insert(consumer_id.to_string(), VecDeque::new());
            debug!(consumer = %consumer_id, "consumer registered");
        }
    }

    /// All pending records newer than `last_sequence`, oldest first.
    ///
    /// Unknown consumers are registered as part of the same locked step.
    /// The outbox is left untouched.
    pub fn get_changes(&self, consumer_id: &str, last_sequence: u64) -> ChangeBatch {
        let mut inner = self.inner.lock();
        let latest_sequence = inner.sequence;
        let outbox = inner
            .outboxes
            .entry(consumer_id.to_string())
            .or_insert_with(|| {
                debug!(consumer = %consumer_id, "consumer registered on first read");
                VecDeque::new()
            });

        let records = outbox
            .iter()
            .filter(|r| r.sequence > last_sequence)
            .cloned()
            .collect();

        ChangeBatch {
            records,
            latest_sequence,
        }
    }

    /// Drop every record up to and including `sequence`.
    ///
    /// Returns how many records were removed; unknown consumers remove none.
    pub fn acknowledge(&self, consumer_id: &str, sequence: u64) -> usize {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(outbox) = inner.outboxes.get_mut(consumer_id) else {
                return 0;
            };
            let before = outbox.len();
            // Sorted by sequence, so the acknowledged prefix is contiguous.
            while outbox.front().is_some_and(|r| r.sequence <= sequence) {
                outbox.pop_front();
            }
            before - outbox.len()
        };

        if removed > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_acknowledged(removed as u64);
            }
            debug!(consumer = %consumer_id, sequence, removed, "changes acknowledged");
        }
        removed
    }

    pub fn stats(&self) -> ChangeLogStats {
        let inner = self.inner.lock();
        ChangeLogStats {
            consumer_count: inner.outboxes.len(),
            global_sequence: inner.sequence,
            total_pending: inner.outboxes.values().map(VecDeque::len).sum(),
        }
    }

    /// Current number of pending records for one consumer
    pub fn pending(&self, consumer_id: &str) -> usize {
        self.inner
            .lock()
            .outboxes
            .get(consumer_id)
            .map_or(0, VecDeque::len)
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new(ChangeLogConfig::default())
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ChangeLog")
            .field("consumers", &stats.consumer_count)
            .field("sequence", &stats.global_sequence)
            .field("capacity", &self.config.capacity)
            .finish_non_exhaustive()
    }
}
