//! Configuration error types.

use thiserror::Error;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    /// One retailer entry is unusable; the rest of the file may be fine.
    #[error("retailer {id}: {reason}")]
    Retailer { id: i64, reason: String },
}

impl ConfigError {
    pub(crate) fn retailer(id: i64, reason: impl Into<String>) -> Self {
        ConfigError::Retailer {
            id,
            reason: reason.into(),
        }
    }
}
