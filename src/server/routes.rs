//! HTTP route handlers
//!
//! Change feed, pull channel, push control and operations endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::artifact::Artifact;
use crate::metrics::MetricsSnapshot;
use crate::protocol::{
    AcknowledgeRequest, ChangesResponse, PendingItemsResponse, PushStatusResponse,
    RecordChangeRequest, RecordChangeResponse, SendResponse, ServerMessage, StatsResponse,
    SuccessResponse,
};
use crate::realtime::broadcast::ConnectionInfo;

// =============================================================================
// Routes
// =============================================================================

/// Sequenced change feed
pub fn change_routes() -> Router<AppState> {
    Router::new()
        .route("/changes", get(get_changes))
        .route("/acknowledge", post(acknowledge))
        .route("/stats", get(stats))
        .route("/record-change", post(record_change))
}

/// Pull channel and push control
pub fn delivery_routes() -> Router<AppState> {
    Router::new()
        .route("/pending-items", get(pending_items))
        .route("/unity-status", get(push_status))
        .route("/status", get(push_status))
        .route("/send", post(send))
}

/// Health, metrics and connection listing
pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/connections", get(connections))
}

// =============================================================================
// Change feed
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesQuery {
    pub client_id: Option<String>,
    pub last_sequence: Option<String>,
}

/// GET /changes?clientId=&lastSequence=
async fn get_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> ApiResult<Json<ChangesResponse>> {
    let client_id = required_client_id(query.client_id)?;
    // Anything unparseable reads as "from the beginning".
    let last_sequence = query
        .last_sequence
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let batch = state.relay.change_log().get_changes(&client_id, last_sequence);
    let changes: Vec<_> = batch.records.iter().map(|r| r.as_ref().clone()).collect();

    Ok(Json(ChangesResponse {
        success: true,
        has_changes: !changes.is_empty(),
        changes,
        latest_sequence: batch.latest_sequence,
    }))
}

/// POST /acknowledge {clientId, sequenceId}
async fn acknowledge(
    State(state): State<AppState>,
    body: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(body) = body?;
    let (Some(client_id), Some(sequence)) = (
        body.client_id.filter(|s| !s.is_empty()),
        body.sequence_id,
    ) else {
        return Err(ApiError::bad_request("clientId and sequenceId are required"));
    };

    state.relay.change_log().acknowledge(&client_id, sequence);
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /stats
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        success: true,
        stats: state.relay.change_log().stats(),
    })
}

/// POST /record-change {artifact}
///
/// Publishes on every channel: change log, push fan-out and the store.
async fn record_change(
    State(state): State<AppState>,
    body: Result<Json<RecordChangeRequest>, JsonRejection>,
) -> ApiResult<Json<RecordChangeResponse>> {
    let Json(body) = body?;
    let artifact = artifact_from_body(body)?;
    let receipt = state.relay.publish(artifact).await;

    Ok(Json(RecordChangeResponse {
        success: true,
        change_id: receipt.record.sequence,
        timestamp: receipt.record.created_at,
    }))
}

// =============================================================================
// Delivery
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

/// GET /pending-items?limit=
async fn pending_items(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<PendingItemsResponse>> {
    let outcome = state.relay.pull(query.limit).await?;

    Ok(Json(PendingItemsResponse {
        success: true,
        count: outcome.items.len(),
        items: outcome.items,
        uses_flag: outcome.uses_flag,
    }))
}

/// GET /status, GET /unity-status
async fn push_status(State(state): State<AppState>) -> Json<PushStatusResponse> {
    let status = state.relay.push().status();
    Json(PushStatusResponse {
        connected: status.connected,
        client_count: status.client_count,
        timestamp: Utc::now(),
    })
}

/// POST /send {artifact}
///
/// Push only. Nothing is recorded in the change log or the store.
async fn send(
    State(state): State<AppState>,
    body: Result<Json<RecordChangeRequest>, JsonRejection>,
) -> ApiResult<Json<SendResponse>> {
    let Json(body) = body?;
    let artifact = artifact_from_body(body)?;
    let id = artifact.id.clone();
    let message = ServerMessage::NewItem {
        data: artifact,
        timestamp: Utc::now(),
        sequence: None,
    };
    let report = state.relay.push().broadcast_message(&message);
    info!(id = %id, sent_to = report.delivered_count, "artifact pushed");

    Ok(Json(SendResponse {
        success: true,
        message: format!("artifact sent to {} clients", report.delivered_count),
        sent_to_clients: report.delivered_count,
    }))
}

// =============================================================================
// Operations
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected_clients: usize,
    pub timestamp: chrono::DateTime<Utc>,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connected_clients: state.relay.push().client_count(),
        timestamp: Utc::now(),
    })
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.relay.metrics().snapshot())
}

/// GET /connections
async fn connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.relay.push().connections())
}

// =============================================================================
// Helpers
// =============================================================================

fn required_client_id(client_id: Option<String>) -> ApiResult<String> {
    client_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("clientId is required"))
}

fn artifact_from_body(body: RecordChangeRequest) -> ApiResult<Artifact> {
    let value = body
        .artifact
        .filter(|v| !v.is_null())
        .ok_or_else(|| ApiError::bad_request("artifact data is required"))?;
    Artifact::from_value(value).map_err(|e| ApiError::bad_request(format!("invalid artifact: {e}")))
}
