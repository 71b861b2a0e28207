//! Wire protocol shared by the push server, the HTTP API and the consumer.
//!
//! WebSocket frames are JSON objects tagged with `"type"`. HTTP bodies use
//! camelCase keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::Artifact;
use crate::realtime::change_log::{ChangeLogStats, ChangeRecord};

/// Frames sent from the server to a connected consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Sent once, right after the connection opens.
    ConnectionConfirmed {
        #[serde(default)]
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A newly recorded artifact.
    NewItem {
        data: Artifact,
        timestamp: DateTime<Utc>,
        /// Change-log sequence, present when the item came through the log.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Reply to a consumer `PING`.
    Pong {
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

impl ServerMessage {
    pub fn confirmed() -> Self {
        Self::ConnectionConfirmed {
            message: "connected to artifact relay".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn new_item(record: &ChangeRecord) -> Self {
        Self::NewItem {
            data: record.payload.clone(),
            timestamp: record.created_at,
            sequence: Some(record.sequence),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Some(Value::String(Utc::now().to_rfc3339())),
        }
    }
}

/// Frames sent from a consumer to the server.
///
/// `PING` is the only type the server acts on; anything else decodes as
/// [`ClientMessage::Other`] and is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Ping {
        // Clients send either epoch seconds or an ISO string.
        #[serde(default)]
        timestamp: Option<Value>,
    },
    #[serde(other)]
    Other,
}

impl ClientMessage {
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: Some(Value::from(Utc::now().timestamp_millis())),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    pub success: bool,
    pub has_changes: bool,
    pub changes: Vec<ChangeRecord>,
    pub latest_sequence: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub client_id: Option<String>,
    pub sequence_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: ChangeLogStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordChangeRequest {
    // Older producers post the payload under `tsukiuta`.
    #[serde(alias = "tsukiuta")]
    pub artifact: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChangeResponse {
    pub success: bool,
    pub change_id: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub sent_to_clients: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItemsResponse {
    pub success: bool,
    pub count: usize,
    pub items: Vec<Artifact>,
    pub uses_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStatusResponse {
    pub connected: bool,
    pub client_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_accepts_numeric_and_string_timestamps() {
        let a: ClientMessage = serde_json::from_str(r#"{"type":"PING","timestamp":1712.5}"#).unwrap();
        let b: ClientMessage =
            serde_json::from_str(r#"{"type":"PING","timestamp":"2026-10-01T00:00:00Z"}"#).unwrap();
        let c: ClientMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert!(matches!(a, ClientMessage::Ping { .. }));
        assert!(matches!(b, ClientMessage::Ping { .. }));
        assert_eq!(c, ClientMessage::Ping { timestamp: None });
    }

    #[test]
    fn test_unknown_client_type_is_other() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"HELLO","x":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Other);
    }

    #[test]
    fn test_server_message_tags() {
        let v = serde_json::to_value(ServerMessage::confirmed()).unwrap();
        assert_eq!(v["type"], "CONNECTION_CONFIRMED");

        let v = serde_json::to_value(ServerMessage::pong()).unwrap();
        assert_eq!(v["type"], "PONG");

        let artifact = Artifact::from_value(json!({"id": "x"})).unwrap();
        let v = serde_json::to_value(ServerMessage::NewItem {
            data: artifact,
            timestamp: Utc::now(),
            sequence: None,
        })
        .unwrap();
        assert_eq!(v["type"], "NEW_ITEM");
        assert_eq!(v["data"]["id"], "x");
        assert!(v.get("sequence").is_none());
    }

    #[test]
    fn test_record_change_accepts_legacy_key() {
        let req: RecordChangeRequest =
            serde_json::from_value(json!({"tsukiuta": {"id": "t-1"}})).unwrap();
        assert_eq!(req.artifact, Some(json!({"id": "t-1"})));
    }
}
