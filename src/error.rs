//! Error types for Stockr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Stockr
#[derive(Debug, Error)]
pub enum StockrError {
    /// Unexpected failure from a host call (reservation, pricing, commit)
    #[error("Host error: {0}")]
    Host(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Stockr operations
pub type Result<T> = std::result::Result<T, StockrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error() {
        let err = StockrError::Host("commit rejected".to_string());
        assert_eq!(err.to_string(), "Host error: commit rejected");
    }

    #[test]
    fn test_config_error() {
        let err = StockrError::Config("normal threshold must be 0-100".to_string());
        assert_eq!(err.to_string(), "Config error: normal threshold must be 0-100");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StockrError = io_err.into();
        assert!(matches!(err, StockrError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("{invalid").unwrap_err();
        let err: StockrError = yaml_err.into();
        assert!(matches!(err, StockrError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StockrError::Host("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
