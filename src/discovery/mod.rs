//! Discovery of new product URLs from retailer listing pages.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::config::{Config, RetailerConfig, duration};
use crate::extract::{ExtractionError, extract_links};
use crate::fetch::{FetchError, PageFetcher};
use crate::storage::{Storage, StorageError};

/// Link list extracted from one discovery page.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLinks {
    pub page_url: String,
    pub links: Vec<String>,
}

/// Cache key of a retailer's memoized discovery links.
pub fn cache_key(retailer_id: i64) -> String {
    format!("discovery:{}", retailer_id)
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("fetch discovery page: {0}")]
    Fetch(#[from] FetchError),

    #[error("discovery page timed out after {0:?}")]
    Timeout(Duration),

    #[error("extract links: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("load known urls: {0}")]
    Storage(#[from] StorageError),
}

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub max_new_per_cycle: usize,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_new_per_cycle: 50,
            cache_ttl: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl DiscoverySettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let discovery = config.discovery.clone().unwrap_or_default();
        let job_timeout = config
            .scraper
            .as_ref()
            .map(|s| s.job_timeout)
            .unwrap_or_default();

        Self {
            max_new_per_cycle: discovery
                .max_new_per_cycle
                .unwrap_or(defaults.max_new_per_cycle),
            cache_ttl: duration::or_default(discovery.cache_ttl, defaults.cache_ttl),
            fetch_timeout: duration::or_default(job_timeout, defaults.fetch_timeout),
        }
    }
}

/// Finds product URLs a retailer lists but storage does not know yet.
pub struct DiscoveryEngine {
    fetcher: Arc<dyn PageFetcher>,
    storage: Arc<dyn Storage>,
    cache: Arc<TtlCache<DiscoveredLinks>>,
    settings: DiscoverySettings,
}

impl DiscoveryEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        storage: Arc<dyn Storage>,
        cache: Arc<TtlCache<DiscoveredLinks>>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            fetcher,
            storage,
            cache,
            settings,
        }
    }

    /// Returns new product URLs for the retailer, in page order and capped at
    /// `max_new_per_cycle`. Retailers without a discovery page yield nothing.
    pub async fn discover(&self, retailer: &RetailerConfig) -> Result<Vec<String>, DiscoveryError> {
        let Some((page_url, selector)) = retailer.discovery() else {
            debug!(retailer_id = retailer.id, "No discovery page configured");
            return Ok(Vec::new());
        };

        let candidates = self.candidate_links(retailer.id, page_url, selector).await?;

        let known: HashSet<String> = self
            .storage
            .list_product_urls(retailer.id)
            .await?
            .into_iter()
            .collect();

        let fresh: Vec<String> = candidates
            .into_iter()
            .filter(|url| !known.contains(url))
            .collect();
        let total_new = fresh.len();
        let capped: Vec<String> = fresh
            .into_iter()
            .take(self.settings.max_new_per_cycle)
            .collect();

        if total_new > capped.len() {
            info!(
                retailer_id = retailer.id,
                found = total_new,
                kept = capped.len(),
                "New product URLs capped for this cycle"
            );
        }

        debug!(
            retailer_id = retailer.id,
            new = capped.len(),
            known = known.len(),
            "Discovery finished"
        );
        Ok(capped)
    }

    /// Memoized link list for the page, fetched and parsed on a cache miss.
    async fn candidate_links(
        &self,
        retailer_id: i64,
        page_url: &str,
        selector: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let key = cache_key(retailer_id);
        if let Some(cached) = self.cache.get(&key) {
            if cached.page_url == page_url {
                debug!(retailer_id, links = cached.links.len(), "Discovery cache hit");
                return Ok(cached.links);
            }
        }

        let page = tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch(page_url))
            .await
            .map_err(|_| DiscoveryError::Timeout(self.settings.fetch_timeout))??;
        let links = extract_links(&page, page_url, selector)?;

        self.cache.set(
            key,
            DiscoveredLinks {
                page_url: page_url.to_string(),
                links: links.clone(),
            },
            self.settings.cache_ttl,
        );
        Ok(links)
    }
}
