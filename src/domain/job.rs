//! Scrape job model.

use chrono::{DateTime, Utc};
use std::fmt;

/// Where a job came from. Decides whether backpressure may drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobSource {
    /// New URL found on a discovery page.
    Discovery,
    /// Periodic re-scrape of an already known product.
    Refresh,
    /// Explicitly requested URL; never dropped.
    Manual,
}

impl JobSource {
    /// Returns true if the job may be dropped when the queue is full.
    pub fn is_droppable(&self) -> bool {
        !matches!(self, JobSource::Manual)
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSource::Discovery => write!(f, "discovery"),
            JobSource::Refresh => write!(f, "refresh"),
            JobSource::Manual => write!(f, "manual"),
        }
    }
}

/// Identity of a job: at most one job per key is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub retailer_id: i64,
    pub product_url: String,
}

impl JobKey {
    /// Cache key used for the scrape cooldown entry.
    pub fn cooldown_key(&self) -> String {
        format!("cooldown:{}:{}", self.retailer_id, self.product_url)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.retailer_id, self.product_url)
    }
}

/// A unit of scraping work for one product URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeJob {
    pub retailer_id: i64,
    pub product_url: String,
    /// Attempts started so far; 0 while the job has never run.
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub source: JobSource,
}

impl ScrapeJob {
    pub fn new(
        retailer_id: i64,
        product_url: impl Into<String>,
        source: JobSource,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            retailer_id,
            product_url: product_url.into(),
            attempt_count: 0,
            enqueued_at,
            source,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            retailer_id: self.retailer_id,
            product_url: self.product_url.clone(),
        }
    }
}
