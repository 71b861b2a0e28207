//! Connection lifecycle as a pure state machine.
//!
//! The push driver feeds transport events in and executes the returned
//! [`Action`]. Nothing here touches the network or the clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    GivenUp,
}

/// Retry settings. Delay grows linearly: `base_delay * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Application asked to connect
    Connect,
    /// Transport handshake completed
    Opened,
    /// Transport could not be opened or failed mid-session
    Failed,
    /// Peer closed the transport
    Closed,
    /// No pong within the configured window
    PongTimeout,
    /// Any inbound frame
    Frame { at: DateTime<Utc> },
    /// Backoff delay elapsed
    RetryElapsed,
    /// Application asked to disconnect
    Disconnect,
}

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    /// Session is up: reset backoff, start pinging
    StartKeepalive,
    /// Frame belongs to a live session
    Dispatch,
    /// Stop keepalive and wait `delay` before connecting again
    ScheduleRetry { delay: Duration, attempt: u32 },
    /// Retries exhausted
    GiveUp { attempts: u32 },
    /// Cancel timers and close the transport without reconnecting
    Shutdown,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub phase: Phase,
    pub attempt: u32,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn apply(&mut self, event: ConnectionEvent, policy: &ReconnectPolicy) -> Action {
        use ConnectionEvent as E;

        match (self.phase, event) {
            (_, E::Disconnect) => {
                self.phase = Phase::Disconnected;
                self.attempt = 0;
                Action::Shutdown
            }

            (Phase::Disconnected | Phase::GivenUp, E::Connect) => {
                self.phase = Phase::Connecting;
                self.attempt = 0;
                Action::OpenTransport
            }

            (Phase::Connecting, E::Opened) => {
                self.phase = Phase::Connected;
                self.attempt = 0;
                self.last_seen_at = Some(Utc::now());
                Action::StartKeepalive
            }

            (Phase::Connecting, E::Failed | E::Closed | E::PongTimeout)
            | (Phase::Connected, E::Failed | E::Closed | E::PongTimeout) => {
                self.phase = Phase::Reconnecting;
                self.schedule_retry(policy)
            }

            (Phase::Connected, E::Frame { at }) => {
                self.last_seen_at = Some(at);
                Action::Dispatch
            }

            (Phase::Reconnecting, E::RetryElapsed) => {
                self.phase = Phase::Connecting;
                Action::OpenTransport
            }

            _ => Action::None,
        }
    }

    fn schedule_retry(&mut self, policy: &ReconnectPolicy) -> Action {
        if self.attempt < policy.max_attempts {
            self.attempt += 1;
            Action::ScheduleRetry {
                delay: policy
                    .base_delay
                    .checked_mul(self.attempt)
                    .unwrap_or(Duration::MAX),
                attempt: self.attempt,
            }
        } else {
            self.phase = Phase::GivenUp;
            Action::GiveUp {
                attempts: self.attempt,
            }
        }
    }
}
