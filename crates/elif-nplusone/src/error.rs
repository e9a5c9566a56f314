//! Error types for the detector
//!
//! Notifications never fail. The only errors surfaced are integration
//! mistakes by the adapter (ending a unit of work that was never begun) and
//! invalid configuration.

use thiserror::Error;

/// Result type for detector operations
pub type DetectorResult<T> = Result<T, DetectorError>;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detector errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("No active unit of work: end_unit_of_work called without begin_unit_of_work")]
    NoActiveUnitOfWork,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to build configuration: {0}")]
    Build(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
