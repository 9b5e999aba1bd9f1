//! Scrape orchestrator configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Worker pool, timeout, cooldown and backpressure settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScraperConfig {
    /// Number of concurrent scrape workers (default: 5).
    pub workers: Option<usize>,
    /// Per-job fetch timeout (default: 30s).
    #[serde(default, with = "duration")]
    pub job_timeout: Duration,
    /// Queue depth above which discovery and refresh jobs are dropped (default: 1000).
    pub max_queue_depth: Option<usize>,
    /// Minimum time between successful scrapes of the same product URL (default: 30m).
    #[serde(default, with = "duration")]
    pub cooldown: Duration,
    /// Time in-flight jobs get to finish on shutdown (default: 10s).
    #[serde(default, with = "duration")]
    pub shutdown_grace: Duration,
    /// User-Agent header sent with page requests.
    pub user_agent: Option<String>,
    /// Retry behaviour for retriable failures.
    pub retry: Option<RetryConfig>,
}

/// Retry settings for retriable failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (default: 3).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry (default: 2s).
    #[serde(default, with = "duration")]
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries (default: 60s).
    #[serde(default, with = "duration")]
    pub max_delay: Duration,
    /// Factor by which the delay grows after each retry (default: 2.0).
    pub multiplier: Option<f64>,
}
