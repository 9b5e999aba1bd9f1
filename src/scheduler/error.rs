//! Scheduler error types.

use crate::config::ConfigError;

/// Scheduler error type.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A cycle is in progress; the trigger was ignored.
    #[error("scrape cycle is already running")]
    AlreadyRunning,
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("retailer config error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid product url: {0}")]
    InvalidUrl(String),
}
