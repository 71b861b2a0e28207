//! HTTP and WebSocket front end of the relay
//!
//! One axum router serves the change feed, the pull channel, the push
//! WebSocket and the operations endpoints.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::RelayConfig;
use crate::errors::RelayResult;
use crate::relay::Relay;

pub use error::{ApiError, ApiResult};

/// Shared handler state
#[derive(Clone, Debug)]
pub struct AppState {
    pub relay: Relay,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

/// Build the complete router. The push WebSocket is mounted at `ws_path`.
pub fn router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .merge(routes::change_routes())
        .merge(routes::delivery_routes())
        .merge(routes::ops_routes())
        .route(ws_path, get(ws::ws_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_requests,
        ))
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(config: &RelayConfig, relay: Relay, shutdown: F) -> RelayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.server.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, relay, &config.server.ws_path, shutdown).await
}

/// Serve on an already bound listener.
///
/// When `shutdown` resolves the listener stops accepting and every push
/// connection is sent a close frame, then in-flight requests drain.
pub async fn serve_with_listener<F>(
    listener: TcpListener,
    relay: Relay,
    ws_path: &str,
    shutdown: F,
) -> RelayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    let push = std::sync::Arc::clone(relay.push());
    let app = router(AppState::new(relay), ws_path);

    info!(addr = %local, ws_path, "artifact relay listening");

    let signal = async move {
        shutdown.await;
        info!("shutdown requested, closing push connections");
        push.close_all();
    };

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(signal)
        .await?;

    info!("artifact relay stopped");
    Ok(())
}
