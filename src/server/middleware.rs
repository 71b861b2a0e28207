use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::AppState;
use crate::metrics::RequestTimer;

/// Count every HTTP request and its latency. 5xx responses count as failed.
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let metrics = state.relay.metrics();
    let mut timer = RequestTimer::new(metrics);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.status().is_server_error() {
        timer.mark_failed();
    }
    tracing::trace!(%method, %path, status = response.status().as_u16(), "request handled");
    response
}
