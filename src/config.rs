//! Relay configuration
//!
//! TOML file with every section optional, then `RELAY_*` environment
//! overrides on top.
//!
//! ```toml
//! [server]
//! port = 3002
//! ws_path = "/unity"
//!
//! [change_log]
//! capacity = 100
//! overflow = "drop_oldest"
//!
//! [store]
//! url = "postgres://localhost/relay"
//!
//! [consumer]
//! server_url = "ws://localhost:3002/unity"
//! api_base = "http://localhost:3002"
//!
//! [log]
//! level = "info"
//! format = "json"
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consumer::ConsumerConfig;
use crate::logging::{LogConfig, LogLevel};
use crate::realtime::ChangeLogConfig;
use crate::store::StoreConfig;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("[{section}] {field}: {message}")]
    InvalidValue {
        section: &'static str,
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}

/// HTTP/WebSocket listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the push WebSocket endpoint
    pub ws_path: String,
    /// Frames queued per push connection before it is dropped
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            ws_path: "/unity".to_string(),
            buffer_size: 256,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ConfigError::invalid_value("server", "host", e.to_string())
            })
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub change_log: ChangeLogConfig,
    pub store: StoreConfig,
    pub consumer: ConsumerConfig,
    pub log: LogConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    /// File if given, defaults otherwise, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: RelayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RELAY_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RELAY_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "RELAY_PORT",
                value: port,
            })?;
        }
        if let Some(capacity) = lookup("RELAY_CHANGE_LOG_CAPACITY") {
            self.change_log.capacity = capacity.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "RELAY_CHANGE_LOG_CAPACITY",
                value: capacity,
            })?;
        }
        if let Some(url) = lookup("RELAY_DATABASE_URL") {
            self.store.url = url;
        }
        if let Some(url) = lookup("RELAY_SERVER_URL") {
            self.consumer.server_url = url;
        }
        if let Some(base) = lookup("RELAY_API_BASE") {
            self.consumer.api_base = base;
        }
        if let Some(id) = lookup("RELAY_CLIENT_ID") {
            self.consumer.client_id = Some(id).filter(|s| !s.is_empty());
        }
        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.log.level = LogLevel::parse(&level);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.ws_path.is_empty() || !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server",
                "ws_path",
                "must start with '/'",
            ));
        }
        if self.server.buffer_size == 0 {
            return Err(ConfigError::invalid_value("server", "buffer_size", "must be > 0"));
        }
        if self.change_log.capacity == 0 {
            return Err(ConfigError::invalid_value("change_log", "capacity", "must be > 0"));
        }
        if self.store.pending_limit == 0 {
            return Err(ConfigError::invalid_value("store", "pending_limit", "must be > 0"));
        }
        if self.store.table.is_empty()
            || !self
                .store
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(ConfigError::invalid_value(
                "store",
                "table",
                "must be a plain identifier",
            ));
        }
        self.consumer.validate()
    }
}

impl FromStr for RelayConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use crate::realtime::OverflowPolicy;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RelayConfig::from_str("").unwrap();
        assert_eq!(config.server.port, 3002);
        assert_eq!(config.server.ws_path, "/unity");
        assert_eq!(config.change_log.capacity, 100);
        assert_eq!(config.change_log.overflow, OverflowPolicy::DropOldest);
        assert!(!config.store.is_configured());
        assert_eq!(config.consumer.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_sections_parse() {
        let toml = r#"
            [server]
            port = 8080
            ws_path = "/push"

            [change_log]
            capacity = 5
            overflow = "drop_newest"

            [store]
            url = "postgres://localhost/relay"
            table = "tsukiutas"

            [consumer]
            client_id = "unity-1"
            max_reconnect_attempts = 3

            [log]
            level = "debug"
            format = "json"
        "#;
        let config = RelayConfig::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ws_path, "/push");
        assert_eq!(config.change_log.capacity, 5);
        assert_eq!(config.change_log.overflow, OverflowPolicy::DropNewest);
        assert!(config.store.is_configured());
        assert_eq!(config.store.table, "tsukiutas");
        assert_eq!(config.consumer.client_id.as_deref(), Some("unity-1"));
        assert_eq!(config.consumer.max_reconnect_attempts, 3);
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml() {
        let err = RelayConfig::from_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RelayConfig::from_str("[change_log]\ncapacity = 0").unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_bad_ws_path_rejected() {
        assert!(RelayConfig::from_str("[server]\nws_path = \"unity\"").is_err());
    }

    #[test]
    fn test_table_name_must_be_identifier() {
        assert!(RelayConfig::from_str("[store]\ntable = \"a; drop table b\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_PORT", "9000"),
            ("RELAY_DATABASE_URL", "postgres://db/relay"),
            ("RELAY_SERVER_URL", "ws://relay:9000/unity"),
            ("RELAY_CLIENT_ID", "unity-7"),
            ("RELAY_LOG_LEVEL", "warn"),
        ]);
        let mut config = RelayConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.url, "postgres://db/relay");
        assert_eq!(config.consumer.server_url, "ws://relay:9000/unity");
        assert_eq!(config.consumer.client_id.as_deref(), Some("unity-7"));
        assert_eq!(config.log.level, LogLevel::Warn);
    }

    #[test]
    fn test_env_bad_port() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env(|k| (k == "RELAY_PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "RELAY_PORT", .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = RelayConfig::from_file("/nonexistent/relay.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn test_bind_addr() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind_addr().unwrap().port(), 3002);
    }
}
