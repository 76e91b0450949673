//! Configuration management for SyncWave
//!
//! Layered configuration: defaults, then an optional TOML file, then
//! `SYNCWAVE_<SECTION>_<KEY>` environment overrides, then validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::transport::{ReconnectPolicy, TransportMode};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub event_store: EventStoreConfig,
    pub replay: ReplayConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,

    /// How long components get to drain on graceful shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Event store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Auto-snapshot every N versions. 0 disables automatic snapshots.
    pub snapshot_interval: u64,

    /// Retries for `append_next` when another writer wins the version race
    pub max_append_retries: u32,

    /// Pending snapshot requests before new ones are dropped
    pub snapshot_queue_capacity: usize,
}

/// Replay and compaction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Cap for explicit ranged replays; keeps only the most recent N events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_replay_events: Option<usize>,

    /// Snapshots retained per actor by compaction
    pub keep_snapshots: usize,

    /// Also prune events covered by the oldest retained snapshot
    pub compact_events: bool,

    /// Default page size for incremental sync
    pub default_page_size: usize,
}

/// Transport configuration shared by both fan-out services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,

    /// Stream heartbeat period
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Per-connection outbound queue bound; overflowing clients are dropped
    pub outbound_queue_capacity: usize,

    /// In-process subscriber buffer
    pub subscriber_capacity: usize,

    pub reconnect: ReconnectPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_timestamp: bool,

    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Prometheus scrape endpoint
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 50,
            max_append_retries: 3,
            snapshot_queue_capacity: 64,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_replay_events: None,
            keep_snapshots: 3,
            compact_events: false,
            default_page_size: 100,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Both,
            heartbeat_interval: Duration::from_secs(30),
            outbound_queue_capacity: 256,
            subscriber_capacity: 1024,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

fn env_override<T>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .parse()
            .map_err(|e: T::Err| ConfigError::env_override(key, &raw, e))?;
    }
    Ok(())
}

fn env_duration(key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(key) {
        *slot = humantime_serde::re::humantime::parse_duration(&raw)
            .map_err(|e| ConfigError::env_override(key, &raw, e))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables on top of defaults.
    ///
    /// Example: `SYNCWAVE_SERVER_BIND_ADDRESS=0.0.0.0:8080`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SYNCWAVE_*` overrides to an existing configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("SYNCWAVE_SERVER_BIND_ADDRESS", &mut self.server.bind_address)?;
        env_duration("SYNCWAVE_SERVER_SHUTDOWN_TIMEOUT", &mut self.server.shutdown_timeout)?;

        env_override(
            "SYNCWAVE_EVENT_STORE_SNAPSHOT_INTERVAL",
            &mut self.event_store.snapshot_interval,
        )?;
        env_override(
            "SYNCWAVE_EVENT_STORE_MAX_APPEND_RETRIES",
            &mut self.event_store.max_append_retries,
        )?;

        env_override("SYNCWAVE_REPLAY_KEEP_SNAPSHOTS", &mut self.replay.keep_snapshots)?;
        env_override("SYNCWAVE_REPLAY_COMPACT_EVENTS", &mut self.replay.compact_events)?;
        if let Ok(raw) = env::var("SYNCWAVE_REPLAY_MAX_REPLAY_EVENTS") {
            self.replay.max_replay_events = if raw.is_empty() {
                None
            } else {
                Some(raw.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::env_override("SYNCWAVE_REPLAY_MAX_REPLAY_EVENTS", &raw, e)
                })?)
            };
        }

        env_override("SYNCWAVE_TRANSPORT_MODE", &mut self.transport.mode)?;
        env_duration(
            "SYNCWAVE_TRANSPORT_HEARTBEAT_INTERVAL",
            &mut self.transport.heartbeat_interval,
        )?;
        env_override(
            "SYNCWAVE_TRANSPORT_OUTBOUND_QUEUE_CAPACITY",
            &mut self.transport.outbound_queue_capacity,
        )?;

        env_override("SYNCWAVE_LOG_LEVEL", &mut self.logging.level)?;
        env_override("SYNCWAVE_LOG_JSON", &mut self.logging.json_format)?;

        env_override("SYNCWAVE_METRICS_ENABLED", &mut self.metrics.enabled)?;
        env_override("SYNCWAVE_METRICS_BIND_ADDRESS", &mut self.metrics.bind_address)?;

        Ok(())
    }

    /// Load configuration from a TOML file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration. Errors name the offending `section.key`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_store.snapshot_queue_capacity == 0 {
            return Err(ConfigError::invalid("event_store", "snapshot_queue_capacity", "must be greater than 0"));
        }

        if self.replay.keep_snapshots == 0 {
            return Err(ConfigError::invalid("replay", "keep_snapshots", "must be greater than 0"));
        }

        if self.replay.default_page_size == 0 {
            return Err(ConfigError::invalid("replay", "default_page_size", "must be greater than 0"));
        }

        if self.replay.max_replay_events == Some(0) {
            return Err(ConfigError::invalid("replay", "max_replay_events", "must be greater than 0 when set"));
        }

        if self.transport.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid("transport", "heartbeat_interval", "must be non-zero"));
        }

        if self.transport.outbound_queue_capacity == 0 {
            return Err(ConfigError::invalid("transport", "outbound_queue_capacity", "must be greater than 0"));
        }

        if self.transport.subscriber_capacity == 0 {
            return Err(ConfigError::invalid("transport", "subscriber_capacity", "must be greater than 0"));
        }

        if self.transport.reconnect.interval.is_zero() {
            return Err(ConfigError::invalid("transport", "reconnect.interval", "must be non-zero"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::invalid(
                "logging",
                "level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }

        Ok(())
    }

    /// Render as TOML in the format `from_file` reads.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_toml_string()?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_store.snapshot_interval, 50);
        assert_eq!(config.transport.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.transport.reconnect.interval, Duration::from_secs(3));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.replay.keep_snapshots = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.transport.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config = Config::default();
        config.replay.max_replay_events = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_error_names_the_setting() {
        let mut config = Config::default();
        config.replay.default_page_size = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { section: "replay", key: "default_page_size", .. }
        ));
        assert_eq!(
            err.to_string(),
            "invalid `replay.default_page_size`: must be greater than 0"
        );

        config = Config::default();
        config.transport.subscriber_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "subscriber_capacity", .. })
        ));
    }

    #[test]
    fn test_bad_env_override_reports_var_and_value() {
        // Only this test touches these variables
        env::set_var("SYNCWAVE_EVENT_STORE_MAX_APPEND_RETRIES", "many");
        let mut config = Config::default();
        let result = config.apply_env();
        env::remove_var("SYNCWAVE_EVENT_STORE_MAX_APPEND_RETRIES");

        match result {
            Err(ConfigError::EnvOverride { var, value, .. }) => {
                assert_eq!(var, "SYNCWAVE_EVENT_STORE_MAX_APPEND_RETRIES");
                assert_eq!(value, "many");
            }
            other => panic!("expected an env override error, got {other:?}"),
        }

        env::set_var("SYNCWAVE_SERVER_SHUTDOWN_TIMEOUT", "soon");
        let result = Config::default().apply_env();
        env::remove_var("SYNCWAVE_SERVER_SHUTDOWN_TIMEOUT");
        assert!(matches!(
            result,
            Err(ConfigError::EnvOverride { ref var, .. }) if var == "SYNCWAVE_SERVER_SHUTDOWN_TIMEOUT"
        ));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[replay]\nkeep_snapshots = \"three\"\n").unwrap();

        match Config::from_file(&path) {
            Err(ConfigError::Toml { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected a TOML error, got {other:?}"),
        }

        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("syncwave.toml");

        let mut config = Config::default();
        config.event_store.snapshot_interval = 5;
        config.transport.mode = TransportMode::Sse;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.event_store.snapshot_interval, 5);
        assert_eq!(loaded.transport.mode, TransportMode::Sse);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[transport]\nheartbeat_interval = \"5s\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.transport.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(loaded.event_store.snapshot_interval, 50);
    }
}
