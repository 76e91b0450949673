use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed
    #[error("logging already initialized: {0}")]
    InitializationFailed(String),

    /// Unknown level or unparseable filter directive
    #[error("invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InvalidConfiguration("unknown log level 'loud'".to_string());
        assert_eq!(err.to_string(), "invalid logging configuration: unknown log level 'loud'");
    }
}
