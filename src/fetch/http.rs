//! reqwest-backed page fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Client as HttpClient, StatusCode};
use tracing::debug;

use super::{FetchError, PageFetcher};

/// Default User-Agent header.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; PricewatchBot/1.0)";

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for creating a new HttpFetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Fetches pages over plain HTTP(S).
pub struct HttpFetcher {
    http_client: HttpClient,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a new fetcher.
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );

        let http_client = HttpClient::builder()
            .user_agent(config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http_client,
            timeout: config.timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Classifies a non-success HTTP status.
pub(crate) fn status_error(status: StatusCode, retry_after: Option<&HeaderValue>) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return FetchError::RateLimited { retry_after };
    }
    FetchError::Status {
        status: status.as_u16(),
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Non-success response");
            return Err(status_error(status, response.headers().get(RETRY_AFTER)));
        }

        response.text().await.map_err(|e| self.map_error(e))
    }
}
