//! Failures while layering SyncWave configuration

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML file could not be read or written
    #[error("config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not TOML, or its keys do not fit the `Config` sections
    #[error("config file {} is not valid: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    /// A `SYNCWAVE_*` variable whose value does not parse
    #[error("environment override {var}={value:?}: {reason}")]
    EnvOverride {
        var: String,
        value: String,
        reason: String,
    },

    /// A setting outside its allowed range after all layers are applied
    #[error("invalid `{section}.{key}`: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn env_override(var: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::EnvOverride {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(section: &'static str, key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section,
            key,
            reason: reason.into(),
        }
    }
}
