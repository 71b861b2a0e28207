//! Zero-cost metrics collection using atomic operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Relay-wide metrics using lock-free atomics
pub struct RelayMetrics {
    changes_recorded: AtomicU64,
    changes_evicted: AtomicU64,
    changes_acknowledged: AtomicU64,
    broadcasts: AtomicU64,
    push_deliveries: AtomicU64,
    push_drops: AtomicU64,
    push_pings: AtomicU64,
    pulls: AtomicU64,
    pull_items: AtomicU64,
    mark_failures: AtomicU64,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            changes_recorded: AtomicU64::new(0),
            changes_evicted: AtomicU64::new(0),
            changes_acknowledged: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            push_deliveries: AtomicU64::new(0),
            push_drops: AtomicU64::new(0),
            push_pings: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
            pull_items: AtomicU64::new(0),
            mark_failures: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_change(&self) {
        self.changes_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record change records lost to outbox overflow
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.changes_evicted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acknowledged(&self, count: u64) {
        self.changes_acknowledged.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one broadcast and its per-connection outcome
    #[inline]
    pub fn record_broadcast(&self, delivered: u64, dropped: u64) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.push_deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.push_drops.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Record an application-level PING from a push client
    #[inline]
    pub fn record_push_ping(&self) {
        self.push_pings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pull(&self, items: u64) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        self.pull_items.fetch_add(items, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mark_failure(&self) {
        self.mark_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the completion of an HTTP request
    #[inline]
    pub fn request_complete(&self, latency_us: u64, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.update_max_latency(latency_us);
    }

    #[inline]
    fn update_max_latency(&self, latency_us: u64) {
        let mut current = self.latency_max_us.load(Ordering::Relaxed);
        while latency_us > current {
            match self.latency_max_us.compare_exchange_weak(
                current,
                latency_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.requests_total.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            changes_recorded: self.changes_recorded.load(Ordering::Relaxed),
            changes_evicted: self.changes_evicted.load(Ordering::Relaxed),
            changes_acknowledged: self.changes_acknowledged.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            push_deliveries: self.push_deliveries.load(Ordering::Relaxed),
            push_drops: self.push_drops.load(Ordering::Relaxed),
            push_pings: self.push_pings.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            pull_items: self.pull_items.load(Ordering::Relaxed),
            mark_failures: self.mark_failures.load(Ordering::Relaxed),
            requests_total: total,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            avg_latency_us: if total > 0 { latency_sum / total } else { 0 },
            max_latency_us: self.latency_max_us.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of relay metrics at a point in time
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub changes_recorded: u64,
    pub changes_evicted: u64,
    pub changes_acknowledged: u64,
    pub broadcasts: u64,
    pub push_deliveries: u64,
    pub push_drops: u64,
    pub push_pings: u64,
    pub pulls: u64,
    pub pull_items: u64,
    pub mark_failures: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub uptime_seconds: u64,
}

/// Request timer for automatic latency tracking
pub struct RequestTimer<'a> {
    metrics: &'a RelayMetrics,
    start: Instant,
    success: bool,
}

impl<'a> RequestTimer<'a> {
    pub fn new(metrics: &'a RelayMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            success: true,
        }
    }

    pub fn mark_failed(&mut self) {
        self.success = false;
    }
}

impl<'a> Drop for RequestTimer<'a> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.metrics.request_complete(elapsed, self.success);
    }
}
