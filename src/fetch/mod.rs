//! Page fetching abstractions and the HTTP implementation.

mod http;

pub use http::{HttpFetcher, HttpFetcherConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Page fetch errors, tagged as retriable or permanent by [`FetchError::is_retriable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not finish within the job timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection reset, DNS failure and other transport problems.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 429.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status.
    #[error("http status {status}")]
    Status { status: u16 },

    /// The URL cannot be requested at all.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Returns true if the same request may succeed later.
    pub fn is_retriable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) | FetchError::RateLimited { .. } => true,
            FetchError::Status { status } => *status >= 500,
            FetchError::InvalidUrl(_) => false,
        }
    }

    /// Minimum wait the server asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// PageFetcher retrieves raw page content. Implementations may use plain HTTP
/// or a headless browser; callers only see the body or a classified error.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}
