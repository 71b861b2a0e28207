use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level error for the relay library
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// WebSocket or HTTP transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame or body that does not match the wire protocol
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
