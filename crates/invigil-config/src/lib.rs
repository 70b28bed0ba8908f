//! Configuration parsing and validation for invigil
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Broker address and channel timing knobs
//! - Backend (system of record) endpoint
//! - Dashboard polling and buffer sizes
//! - Validation with clear error messages

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Raw TOML shape before validation
#[derive(Debug, Deserialize)]
struct RawConfig {
    config_version: u32,
    #[serde(default)]
    broker: RawBroker,
    #[serde(default)]
    backend: RawBackend,
    #[serde(default)]
    dashboard: RawDashboard,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawBroker {
    addr: String,
    reconnect_delay_secs: u64,
    heartbeat_secs: u64,
    subscribe_timeout_secs: u64,
    publish_retry_secs: u64,
}

impl Default for RawBroker {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4870".into(),
            reconnect_delay_secs: 5,
            heartbeat_secs: 4,
            subscribe_timeout_secs: 5,
            publish_retry_secs: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawBackend {
    base_url: String,
    request_timeout_secs: u64,
}

impl Default for RawBackend {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDashboard {
    poll_interval_secs: u64,
    activity_buffer: usize,
    sound_enabled: bool,
}

impl Default for RawDashboard {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            activity_buffer: 100,
            sound_enabled: true,
        }
    }
}

/// Broker/channel settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub addr: String,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub subscribe_timeout: Duration,
    pub publish_retry_delay: Duration,
}

/// System-of-record endpoint settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

/// Proctor dashboard settings
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub poll_interval: Duration,
    pub activity_buffer: usize,
    pub sound_enabled: bool,
}

/// Validated configuration ready for use
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub backend: BackendConfig,
    pub dashboard: DashboardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_raw(RawConfig {
            config_version: CURRENT_CONFIG_VERSION,
            broker: RawBroker::default(),
            backend: RawBackend::default(),
            dashboard: RawDashboard::default(),
        })
    }
}

impl Config {
    fn from_raw(raw: RawConfig) -> Self {
        Self {
            broker: BrokerConfig {
                addr: raw.broker.addr,
                reconnect_delay: Duration::from_secs(raw.broker.reconnect_delay_secs),
                heartbeat_interval: Duration::from_secs(raw.broker.heartbeat_secs),
                subscribe_timeout: Duration::from_secs(raw.broker.subscribe_timeout_secs),
                publish_retry_delay: Duration::from_secs(raw.broker.publish_retry_secs),
            },
            backend: BackendConfig {
                base_url: raw.backend.base_url,
                request_timeout: Duration::from_secs(raw.backend.request_timeout_secs),
            },
            dashboard: DashboardConfig {
                poll_interval: Duration::from_secs(raw.dashboard.poll_interval_secs),
                activity_buffer: raw.dashboard.activity_buffer,
                sound_enabled: raw.dashboard.sound_enabled,
            },
        }
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Config::from_raw(raw))
}

fn validate(raw: &RawConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if raw.broker.addr.is_empty() {
        errors.push("broker.addr must not be empty".into());
    }
    if raw.broker.heartbeat_secs == 0 {
        errors.push("broker.heartbeat_secs must be at least 1".into());
    }
    if raw.broker.subscribe_timeout_secs == 0 {
        errors.push("broker.subscribe_timeout_secs must be at least 1".into());
    }
    if raw.backend.base_url.is_empty() {
        errors.push("backend.base_url must not be empty".into());
    }
    if raw.dashboard.poll_interval_secs == 0 {
        errors.push("dashboard.poll_interval_secs must be at least 1".into());
    }
    if raw.dashboard.activity_buffer == 0 {
        errors.push("dashboard.activity_buffer must be at least 1".into());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config("config_version = 1").unwrap();
        assert_eq!(config.broker.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.broker.heartbeat_interval, Duration::from_secs(4));
        assert_eq!(config.dashboard.poll_interval, Duration::from_secs(10));
        assert_eq!(config.dashboard.activity_buffer, 100);
    }

    #[test]
    fn parse_full_config() {
        let config = parse_config(
            r#"
            config_version = 1

            [broker]
            addr = "broker.example.org:4870"
            reconnect_delay_secs = 3

            [backend]
            base_url = "https://exams.example.org"

            [dashboard]
            poll_interval_secs = 15
            sound_enabled = false
        "#,
        )
        .unwrap();

        assert_eq!(config.broker.addr, "broker.example.org:4870");
        assert_eq!(config.broker.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.backend.base_url, "https://exams.example.org");
        assert_eq!(config.dashboard.poll_interval, Duration::from_secs(15));
        assert!(!config.dashboard.sound_enabled);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_zero_intervals() {
        let result = parse_config(
            r#"
            config_version = 1

            [dashboard]
            poll_interval_secs = 0
            activity_buffer = 0
        "#,
        );
        match result {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.broker.publish_retry_delay, Duration::from_secs(1));
    }
}
