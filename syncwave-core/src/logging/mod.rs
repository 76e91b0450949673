//! Logging subsystem for SyncWave
//!
//! Thin setup layer over `tracing-subscriber`. Library code only uses the
//! `tracing` macros; binaries call `init_logging_with_config` once.
//!
//! The transport stack (hyper, tungstenite, reqwest) is capped at `warn`
//! unless a directive or `RUST_LOG` says otherwise, so `debug` on SyncWave
//! does not drown in frame-level noise.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

use crate::config::LoggingConfig;

/// Crates whose logs are capped at `warn` by default
pub const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "tungstenite", "tokio_tungstenite", "reqwest", "axum"];

/// Resolved logging settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
    /// Extra `EnvFilter` directives, e.g. `syncwave_core::transport=trace`
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::new(LogLevel::Info)
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        LogConfig {
            level,
            json_format: false,
            with_timestamp: true,
            with_target: true,
            directives: Vec::new(),
        }
    }

    /// Build from the `[logging]` section of the application config.
    pub fn from_config(config: &LoggingConfig) -> Result<Self, LoggingError> {
        Ok(LogConfig {
            level: config.level.parse()?,
            json_format: config.json_format,
            with_timestamp: config.with_timestamp,
            with_target: config.with_target,
            directives: Vec::new(),
        })
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Filter from the level, the quiet-target caps and extra directives.
    /// Later directives win, so callers can re-enable a quiet target.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let mut filter = EnvFilter::new(self.level.as_str());
        let quiet = QUIET_TARGETS.iter().map(|target| format!("{target}=warn"));
        for directive in quiet.chain(self.directives.iter().cloned()) {
            let parsed = directive
                .parse()
                .map_err(|e| LoggingError::InvalidConfiguration(format!("directive '{directive}': {e}")))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Initialize logging at `info` with the default format.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Install the global subscriber. `RUST_LOG` replaces the configured
/// filter entirely when set.
///
/// # Example
/// ```
/// use syncwave_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug).with_directive("syncwave_core::replay=trace");
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (config.json_format, config.with_timestamp) {
        (true, true) => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init(),
        (true, false) => registry
            .with(fmt::layer().json().without_time().with_target(config.with_target))
            .try_init(),
        (false, true) => registry
            .with(fmt::layer().with_target(config.with_target))
            .try_init(),
        (false, false) => registry
            .with(fmt::layer().without_time().with_target(config.with_target))
            .try_init(),
    };

    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}
