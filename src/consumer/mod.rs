//! Consumer side of the relay
//!
//! A push session over WebSocket with keepalive and linear-backoff
//! reconnects, plus an independent poll loop against the pull channel.
//! Both feed one dedup window before anything reaches the application.

pub mod client;
pub mod dispatch;
pub mod poll;
pub mod push;
pub mod state;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Upper bound for every `*_ms` setting
const MAX_DURATION_MS: u64 = 86_400_000;

pub use client::{ConsumerClient, ConsumerEvent, ConsumerHandle, DeliveryChannel};
pub use state::{Action, ConnectionEvent, ConnectionState, Phase, ReconnectPolicy};

/// Consumer section of the relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Push endpoint
    pub server_url: String,
    /// Base URL of the HTTP API, used for polling and acknowledgments
    pub api_base: String,
    /// Change-feed identity; pushed sequences are acknowledged when set
    pub client_id: Option<String>,
    pub ping_interval_ms: u64,
    /// `None` means twice the ping interval, `Some(0)` disables the check
    pub pong_timeout_ms: Option<u64>,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub poll_enabled: bool,
    pub poll_interval_ms: u64,
    pub pending_limit: usize,
    pub request_timeout_ms: u64,
    /// Number of artifact ids remembered for deduplication
    pub dedup_window: usize,
    /// Strip control characters from string fields before dispatch
    pub sanitize: bool,
    /// Capacity of the event channel handed to the application.
    /// Pushed artifacts that find it full are not acknowledged and are left
    /// to the pull channel; polling waits for room.
    pub event_buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:3002/unity".to_string(),
            api_base: "http://localhost:3002".to_string(),
            client_id: None,
            ping_interval_ms: 30_000,
            pong_timeout_ms: None,
            reconnect_base_delay_ms: 5_000,
            max_reconnect_attempts: 5,
            poll_enabled: true,
            poll_interval_ms: 5_000,
            pending_limit: 10,
            request_timeout_ms: 10_000,
            dedup_window: 1_000,
            sanitize: false,
            event_buffer: 256,
        }
    }
}

impl ConsumerConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Option<Duration> {
        match self.pong_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(self.ping_interval().saturating_mul(2)),
        }
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay(),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// `{api_base}/{path}` without doubled slashes
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::invalid_value(
                "consumer",
                "server_url",
                "must be a ws:// or wss:// URL",
            ));
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ConfigError::invalid_value(
                "consumer",
                "api_base",
                "must be an http:// or https:// URL",
            ));
        }
        for (field, value) in [
            ("ping_interval_ms", self.ping_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value("consumer", field, "must be > 0"));
            }
        }
        for (field, value) in [
            ("ping_interval_ms", self.ping_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("pong_timeout_ms", self.pong_timeout_ms.unwrap_or(0)),
        ] {
            if value > MAX_DURATION_MS {
                return Err(ConfigError::invalid_value(
                    "consumer",
                    field,
                    "must be at most one day",
                ));
            }
        }
        if self.dedup_window == 0 || self.event_buffer == 0 || self.pending_limit == 0 {
            return Err(ConfigError::invalid_value(
                "consumer",
                "dedup_window/event_buffer/pending_limit",
                "must be > 0",
            ));
        }
        Ok(())
    }
}
