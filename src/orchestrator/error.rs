//! Classification of per-attempt scrape failures.

use std::time::Duration;

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::fetch::FetchError;

/// Outcome of a failed attempt; drives the retry state machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScrapeError {
    /// May succeed later: timeouts, transport errors, 5xx, 429.
    #[error("{error}")]
    Retriable {
        error: String,
        retry_after: Option<Duration>,
    },

    /// Will fail the same way again: selector or markup mismatch, bad price, 4xx.
    #[error("{0}")]
    Permanent(String),
}

impl ScrapeError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ScrapeError::Retriable { .. })
    }
}

impl From<FetchError> for ScrapeError {
    fn from(err: FetchError) -> Self {
        if err.is_retriable() {
            ScrapeError::Retriable {
                retry_after: err.retry_after(),
                error: err.to_string(),
            }
        } else {
            ScrapeError::Permanent(err.to_string())
        }
    }
}

impl From<ExtractionError> for ScrapeError {
    fn from(err: ExtractionError) -> Self {
        ScrapeError::Permanent(err.to_string())
    }
}
