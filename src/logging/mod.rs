use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Log Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Log Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable terminal output
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Logging section of the relay configuration
///
/// ```toml
/// [log]
/// level = "info"
/// format = "text"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include thread ids in every line
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            thread_ids: true,
        }
    }
}

impl LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub fn default_directive(&self) -> String {
        match self.level {
            LogLevel::Off => "off".to_string(),
            level => format!("{level},artifact_relay={}", level.min(LogLevel::Debug)),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is a no-op.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(config.thread_ids);

    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // Already installed (tests, embedding applications).
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(LogLevel::parse("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("none"), LogLevel::Off);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Info);
    }

    #[test]
    fn test_default_directive_caps_crate_at_debug() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.default_directive(), "info,artifact_relay=debug");

        let cfg = LogConfig {
            level: LogLevel::Error,
            ..LogConfig::default()
        };
        assert_eq!(cfg.default_directive(), "error,artifact_relay=debug");

        let cfg = LogConfig {
            level: LogLevel::Trace,
            ..LogConfig::default()
        };
        assert_eq!(cfg.default_directive(), "trace,artifact_relay=trace");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(&LogConfig::default());
        init(&LogConfig::default());
    }
}
