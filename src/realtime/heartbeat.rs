use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Ping/pong bookkeeping for one connection.
///
/// The consumer keeps one of these per push session. A `None` timeout means
/// liveness is left entirely to the transport.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    timeout: Option<Duration>,
    last_pong: Instant,
    pings: u64,
    pongs: u64,
}

impl Heartbeat {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self::started_at(timeout, Instant::now())
    }

    pub fn started_at(timeout: Option<Duration>, now: Instant) -> Self {
        Self {
            timeout,
            last_pong: now,
            pings: 0,
            pongs: 0,
        }
    }

    pub fn record_ping(&mut self) {
        self.pings += 1;
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
        self.pongs += 1;
    }

    /// Whether the peer has stayed silent past the timeout
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.last_pong) > timeout,
            None => false,
        }
    }

    pub fn pings(&self) -> u64 {
        self.pings
    }

    pub fn pongs(&self) -> u64 {
        self.pongs
    }
}

/// Server-side liveness view over many connections.
///
/// Tracks when each connection last sent anything. The push server only
/// reports this; it does not close idle connections on its own.
pub struct HeartbeatMonitor<K: Eq + Hash> {
    clients: DashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> HeartbeatMonitor<K> {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, key: K) {
        self.clients.insert(key, Instant::now());
    }

    pub fn unregister(&self, key: &K) -> bool {
        self.clients.remove(key).is_some()
    }

    /// Record inbound traffic from a connection
    pub fn touch(&self, key: &K) -> bool {
        if let Some(mut seen) = self.clients.get_mut(key) {
            *seen = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn idle_for(&self, key: &K) -> Option<Duration> {
        self.clients.get(key).map(|seen| seen.elapsed())
    }
}

impl<K: Eq + Hash + Clone> Default for HeartbeatMonitor<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_expires_without_pong() {
        let start = Instant::now();
        let mut hb = Heartbeat::started_at(Some(Duration::from_secs(60)), start);
        hb.record_ping();
        assert!(!hb.is_expired(start + Duration::from_secs(59)));
        assert!(hb.is_expired(start + Duration::from_secs(61)));

        hb.record_pong(start + Duration::from_secs(61));
        assert!(!hb.is_expired(start + Duration::from_secs(100)));
        assert_eq!(hb.pings(), 1);
        assert_eq!(hb.pongs(), 1);
    }

    #[test]
    fn test_heartbeat_without_timeout_never_expires() {
        let start = Instant::now();
        let hb = Heartbeat::started_at(None, start);
        assert!(!hb.is_expired(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_monitor_tracks_known_clients_only() {
        let monitor: HeartbeatMonitor<u64> = HeartbeatMonitor::new();
        monitor.register(1);
        assert!(monitor.touch(&1));
        assert!(!monitor.touch(&2));
        assert!(monitor.idle_for(&1).is_some());
        assert!(monitor.idle_for(&2).is_none());

        assert!(monitor.unregister(&1));
        assert!(!monitor.unregister(&1));
        assert!(monitor.idle_for(&1).is_none());
    }
}
