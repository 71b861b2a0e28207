use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::change_log::ChangeRecord;
use super::heartbeat::HeartbeatMonitor;
use crate::metrics::RelayMetrics;
use crate::protocol::{ClientMessage, ServerMessage};

/// Unique identifier for a connected push client
pub type ConnectionId = u64;

/// Frame queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(Arc<str>),
    Close,
}

/// Configuration for the push fan-out server
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    /// Maximum number of frames queued per connection before it is dropped
    pub buffer_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// Result of one broadcast
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub delivered_count: usize,
    /// Connections removed because their queue was full or closed
    pub dropped_count: usize,
}

/// Push-channel health, as reported by the status endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStatus {
    pub connected: bool,
    pub client_count: usize,
}

/// Per-connection view for observability
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen_ago_secs: Option<f64>,
}

struct Connection {
    tx: mpsc::Sender<OutboundFrame>,
    remote: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// Best-effort fan-out of new artifacts to every open push connection.
///
/// Each connection owns a bounded queue drained by its writer task, so a
/// slow client can never stall a broadcast. A connection whose queue is
/// full or closed is removed on the spot. Nothing here is tracked per
/// sequence: the pull channel is the authoritative one.
pub struct PushServer {
    config: BroadcastConfig,
    connections: DashMap<ConnectionId, Connection>,
    heartbeat: HeartbeatMonitor<ConnectionId>,
    next_id: AtomicU64,
    metrics: Option<Arc<RelayMetrics>>,
}

impl PushServer {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            heartbeat: HeartbeatMonitor::new(),
            next_id: AtomicU64::new(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a new connection and queue its confirmation frame.
    pub fn on_connect(
        &self,
        remote: Option<SocketAddr>,
    ) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));

        if let Some(text) = encode(&ServerMessage::confirmed()) {
            // Fresh queue, cannot be full.
            let _ = tx.try_send(OutboundFrame::Text(text));
        }

        self.connections.insert(
            id,
            Connection {
                tx,
                remote,
                connected_at: Utc::now(),
            },
        );
        self.heartbeat.register(id);
        info!(connection = id, remote = ?remote, clients = self.connections.len(), "push client connected");
        (id, rx)
    }

    /// Write `record` to every open connection.
    pub fn broadcast(&self, record: &ChangeRecord) -> BroadcastReport {
        self.broadcast_message(&ServerMessage::new_item(record))
    }

    /// Serialize once and fan out to all connections.
    pub fn broadcast_message(&self, message: &ServerMessage) -> BroadcastReport {
        if self.connections.is_empty() {
            debug!("no push clients connected, broadcast skipped");
            if let Some(metrics) = &self.metrics {
                metrics.record_broadcast(0, 0);
            }
            return BroadcastReport::default();
        }

        let Some(text) = encode(message) else {
            return BroadcastReport::default();
        };

        let mut delivered = 0usize;
        let mut dead: Vec<ConnectionId> = Vec::new();

        for entry in self.connections.iter() {
            match entry.tx.try_send(OutboundFrame::Text(Arc::clone(&text))) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = *entry.key(), "push client queue full, dropping connection");
                    dead.push(*entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        // Removal happens outside the iteration to avoid shard deadlocks.
        for id in &dead {
            self.remove(*id, "write failed");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_broadcast(delivered as u64, dead.len() as u64);
        }
        debug!(delivered, dropped = dead.len(), "broadcast complete");

        BroadcastReport {
            delivered_count: delivered,
            dropped_count: dead.len(),
        }
    }

    /// Handle an inbound text frame.
    ///
    /// Only `PING` is answered. Unknown types and unparseable frames are
    /// logged and dropped; the connection stays open.
    pub fn on_message(&self, id: ConnectionId, text: &str) {
        self.heartbeat.touch(&id);

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Ping { .. }) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_push_ping();
                }
                self.send_to(id, &ServerMessage::pong());
            }
            Ok(ClientMessage::Other) => {
                warn!(connection = id, "ignoring unsupported message type");
            }
            Err(e) => {
                warn!(connection = id, error = %e, "malformed message dropped");
            }
        }
    }

    pub fn on_close(&self, id: ConnectionId) {
        self.remove(id, "closed");
    }

    pub fn on_error(&self, id: ConnectionId) {
        self.remove(id, "transport error");
    }

    /// Queue a frame for a single connection
    pub fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };
        let failed = match self.connections.get(&id) {
            Some(conn) => conn.tx.try_send(OutboundFrame::Text(text)).is_err(),
            None => return false,
        };
        if failed {
            self.remove(id, "write failed");
        }
        !failed
    }

    pub fn status(&self) -> PushStatus {
        let client_count = self.connections.len();
        PushStatus {
            connected: client_count > 0,
            client_count,
        }
    }

    pub fn client_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|e| ConnectionInfo {
                id: *e.key(),
                remote: e.remote.map(|addr| addr.to_string()),
                connected_at: e.connected_at,
                last_seen_ago_secs: self.heartbeat.idle_for(e.key()).map(|d| d.as_secs_f64()),
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    /// Ask every connection to close and forget them all.
    ///
    /// Called after the listener has stopped accepting, so clients do not
    /// reconnect into a server that is going away.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        for id in &ids {
            if let Some((_, conn)) = self.connections.remove(id) {
                let _ = conn.tx.try_send(OutboundFrame::Close);
            }
            self.heartbeat.unregister(id);
        }
        if !ids.is_empty() {
            info!(closed = ids.len(), "closed all push connections");
        }
        ids.len()
    }

    fn remove(&self, id: ConnectionId, reason: &str) {
        if self.connections.remove(&id).is_some() {
            self.heartbeat.unregister(&id);
            info!(connection = id, reason, clients = self.connections.len(), "push client removed");
        }
    }
}

impl Default for PushServer {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

impl std::fmt::Debug for PushServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushServer")
            .field("clients", &self.connections.len())
            .field("buffer_size", &self.config.buffer_size)
            .finish_non_exhaustive()
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(s) => Some(Arc::from(s)),
        Err(e) => {
            warn!(error = %e, "failed to serialize push message");
            None
        }
    }
}
