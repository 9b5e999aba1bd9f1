//! Built-in event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{Event, EventData, EventHandler, FailureReason, HandlerError, PriceChangeData};
use crate::cache::TtlCache;
use crate::discovery::{self, DiscoveredLinks};
use crate::domain::PriceHistoryEntry;
use crate::storage::Storage;

/// Persists scraped products and their price history, and emits `PriceChanged`.
pub struct PriceRecorder {
    storage: Arc<dyn Storage>,
}

impl PriceRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventHandler for PriceRecorder {
    fn name(&self) -> &'static str {
        "price_recorder"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        let EventData::ProductScraped(record) = &event.data else {
            return Ok(Vec::new());
        };

        let existing = self
            .storage
            .find_product(record.retailer_id, &record.product_url)
            .await?;

        let mut product = record.clone();
        if product.product_identifier.is_none() {
            product.product_identifier = existing
                .as_ref()
                .and_then(|p| p.product_identifier.clone());
        }
        let old_price = existing.as_ref().map(|p| p.price);

        let stored = self.storage.save_product(&product).await?;
        let product_id = stored
            .id
            .ok_or_else(|| HandlerError::Failed("stored product has no id".into()))?;

        self.storage
            .append_price_history(&PriceHistoryEntry {
                product_id,
                retailer_id: stored.retailer_id,
                price: stored.price,
                recorded_at: stored.last_scraped_at,
            })
            .await?;

        if old_price == Some(stored.price) {
            debug!(product_id, price = %stored.price, "Price unchanged");
            return Ok(Vec::new());
        }

        Ok(vec![Event::price_changed(PriceChangeData {
            product_id,
            retailer_id: stored.retailer_id,
            product_identifier: stored.product_identifier,
            old_price,
            new_price: stored.price,
        })])
    }
}

/// Drops a retailer's memoized discovery links after a permanent failure,
/// so the next cycle re-reads the discovery page.
pub struct DiscoveryCacheInvalidator {
    cache: Arc<TtlCache<DiscoveredLinks>>,
}

impl DiscoveryCacheInvalidator {
    pub fn new(cache: Arc<TtlCache<DiscoveredLinks>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler for DiscoveryCacheInvalidator {
    fn name(&self) -> &'static str {
        "discovery_cache_invalidator"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        if let EventData::ScrapingFailed(failure) = &event.data {
            if failure.reason == FailureReason::Permanent
                && self
                    .cache
                    .invalidate(&discovery::cache_key(failure.job.retailer_id))
            {
                info!(
                    retailer_id = failure.job.retailer_id,
                    "Discovery cache invalidated after permanent failure"
                );
            }
        }
        Ok(Vec::new())
    }
}

/// Logs price moves at or above a percentage threshold at warn level.
pub struct PriceMovementLogger {
    threshold: Decimal,
}

impl PriceMovementLogger {
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl EventHandler for PriceMovementLogger {
    fn name(&self) -> &'static str {
        "price_movement_logger"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        let EventData::PriceChanged(change) = &event.data else {
            return Ok(Vec::new());
        };

        match change.change_percent() {
            Some(percent) if percent.abs() >= self.threshold => warn!(
                product_id = change.product_id,
                retailer_id = change.retailer_id,
                old_price = ?change.old_price,
                new_price = %change.new_price,
                change_percent = %percent,
                "Significant price change"
            ),
            Some(percent) => debug!(
                product_id = change.product_id,
                change_percent = %percent,
                "Price changed"
            ),
            None => debug!(
                product_id = change.product_id,
                price = %change.new_price,
                "First price observation"
            ),
        }
        Ok(Vec::new())
    }
}
