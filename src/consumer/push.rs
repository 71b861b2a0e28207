//! Push session driver
//!
//! Runs the WebSocket side of the consumer: connect, keepalive, pong
//! timeout and linear-backoff reconnects, all decided by
//! [`ConnectionState::apply`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::client::{ConsumerEvent, DeliveryChannel};
use super::dispatch::{Dispatcher, Handoff};
use super::state::{Action, ConnectionEvent, ConnectionState, ReconnectPolicy};
use super::ConsumerConfig;
use crate::protocol::{AcknowledgeRequest, ClientMessage, ServerMessage};
use crate::realtime::Heartbeat;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Closed(String),
    Failed(String),
    PongTimeout,
}

pub struct PushSession {
    config: Arc<ConsumerConfig>,
    policy: ReconnectPolicy,
    http: reqwest::Client,
    dispatcher: Arc<Dispatcher>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl PushSession {
    pub fn new(
        config: Arc<ConsumerConfig>,
        http: reqwest::Client,
        dispatcher: Arc<Dispatcher>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            policy: config.reconnect_policy(),
            config,
            http,
            dispatcher,
            state,
        }
    }

    fn transition(&self, event: ConnectionEvent) -> Action {
        let mut action = Action::None;
        self.state
            .send_modify(|state| action = state.apply(event, &self.policy));
        action
    }

    /// Drive the session until shutdown or until retries run out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let url = self.config.server_url.clone();
        let mut action = self.transition(ConnectionEvent::Connect);

        loop {
            if *shutdown.borrow() {
                break;
            }
            match action {
                Action::OpenTransport => {
                    debug!(url = %url, attempt = self.state.borrow().attempt, "connecting to push server");
                    let connected = tokio::select! {
                        r = connect_async(url.as_str()) => r,
                        _ = shutdown.changed() => break,
                    };

                    match connected {
                        Ok((ws, _response)) => {
                            self.transition(ConnectionEvent::Opened);
                            info!(url = %url, "push connection established");
                            self.dispatcher.emit(ConsumerEvent::Connected).await;

                            let (event, reason) = match self.session(ws, &mut shutdown).await {
                                SessionEnd::Shutdown => break,
                                SessionEnd::Closed(reason) => (ConnectionEvent::Closed, reason),
                                SessionEnd::Failed(reason) => (ConnectionEvent::Failed, reason),
                                SessionEnd::PongTimeout => {
                                    (ConnectionEvent::PongTimeout, "pong timeout".to_string())
                                }
                            };
                            warn!(url = %url, reason = %reason, "push connection lost");
                            self.dispatcher
                                .emit(ConsumerEvent::Disconnected { reason })
                                .await;
                            action = self.transition(event);
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "push connection failed");
                            action = self.transition(ConnectionEvent::Failed);
                        }
                    }
                }
                Action::ScheduleRetry { delay, attempt } => {
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "scheduling reconnection attempt"
                    );
                    tokio::select! {
                        () = sleep(delay) => action = self.transition(ConnectionEvent::RetryElapsed),
                        _ = shutdown.changed() => break,
                    }
                }
                Action::GiveUp { attempts } => {
                    error!(url = %url, attempts, "giving up on push connection");
                    self.dispatcher.emit(ConsumerEvent::GaveUp { attempts }).await;
                    return;
                }
                Action::StartKeepalive | Action::Dispatch | Action::Shutdown | Action::None => break,
            }
        }

        self.transition(ConnectionEvent::Disconnect);
        debug!("push session stopped");
    }

    async fn session(&self, ws: WsStream, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        let every = self.config.ping_interval();
        let mut ticker = interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = Heartbeat::new(self.config.pong_timeout());
        let end = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.transition(ConnectionEvent::Frame { at: Utc::now() });
                        self.handle_text(text.as_str(), &mut heartbeat);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        self.transition(ConnectionEvent::Frame { at: Utc::now() });
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed the connection".to_string());
                        break SessionEnd::Closed(reason);
                    }
                    Some(Ok(_)) => {
                        self.transition(ConnectionEvent::Frame { at: Utc::now() });
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                    None => break SessionEnd::Closed("stream ended".to_string()),
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if heartbeat.is_expired(now) {
                        let _ = write.send(Message::Close(None)).await;
                        break SessionEnd::PongTimeout;
                    }
                    let ping = match serde_json::to_string(&ClientMessage::ping()) {
                        Ok(ping) => ping,
                        Err(e) => {
                            warn!(error = %e, "failed to encode ping");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(ping.into())).await {
                        break SessionEnd::Failed(e.to_string());
                    }
                    heartbeat.record_ping();
                },
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break SessionEnd::Shutdown;
                }
            }
        };
        debug!(pings = heartbeat.pings(), pongs = heartbeat.pongs(), end = ?end, "push session ended");
        end
    }

    /// Never awaits, so a slow application cannot stall pings or pong reads.
    fn handle_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::ConnectionConfirmed { message, .. }) => {
                debug!(message = %message, "push connection confirmed");
            }
            Ok(ServerMessage::NewItem { data, sequence, .. }) => {
                let handoff = self.dispatcher.try_dispatch(data, DeliveryChannel::Push);
                if !matches!(handoff, Handoff::Delivered | Handoff::Duplicate) {
                    return;
                }
                if let (Some(sequence), Some(client_id)) = (sequence, &self.config.client_id) {
                    self.acknowledge(client_id.clone(), sequence);
                }
            }
            Ok(ServerMessage::Pong { .. }) => heartbeat.record_pong(Instant::now()),
            Err(e) => warn!(error = %e, "unrecognized push frame ignored"),
        }
    }

    /// Post the acknowledgment in the background so the read loop never waits on HTTP.
    fn acknowledge(&self, client_id: String, sequence: u64) {
        let http = self.http.clone();
        let url = self.config.api_url("/acknowledge");
        tokio::spawn(async move {
            let body = AcknowledgeRequest {
                client_id: Some(client_id),
                sequence_id: Some(sequence),
            };
            let result = http
                .post(&url)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                warn!(sequence, error = %e, "failed to acknowledge change");
            }
        });
    }
}
