//! Push WebSocket endpoint
//!
//! One reader loop per socket feeding [`PushServer::on_message`], and one
//! writer task draining the connection's outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::Extensions;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use super::AppState;
use crate::realtime::{OutboundFrame, PushServer};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    extensions: Extensions,
) -> Response {
    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let push = Arc::clone(state.relay.push());
    ws.on_upgrade(move |socket| handle_socket(socket, push, remote))
}

async fn handle_socket(socket: WebSocket, push: Arc<PushServer>, remote: Option<SocketAddr>) {
    let (id, mut outbound) = push.on_connect(remote);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sink.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut failed = false;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => push.on_message(id, text.as_str()),
            Ok(Message::Binary(_)) => {
                warn!(connection = id, "binary frame ignored");
            }
            Ok(Message::Close(_)) => break,
            // Control frames are answered by the protocol layer.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!(connection = id, error = %e, "push socket error");
                failed = true;
                break;
            }
        }
    }

    if failed {
        push.on_error(id);
    } else {
        push.on_close(id);
    }
    writer.abort();
}
