//! Cross-retailer opportunity detection.
//!
//! Products are correlated by `product_identifier`. For every key with fresh
//! prices from at least two retailers, the cheapest retailer becomes the buy
//! side and the most expensive one the reference. The resulting opportunity is
//! upserted by correlation key and flips to inactive, never deleted, when the
//! gap closes or the comparison goes stale.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, ConfigError, duration, parse_percent};
use crate::domain::{ArbitrageOpportunity, ProductRecord};
use crate::events::{Event, EventData, EventHandler, HandlerError};
use crate::metrics::Metrics;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cannot compare prices for {0}: buy price is not positive")]
    InvalidPrice(String),
}

/// Detection thresholds and timing.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Gap in percent an opportunity must exceed to become active.
    pub threshold: Decimal,
    pub freshness_window: Duration,
    pub sweep_interval: Duration,
    /// Percentage points an active opportunity may drop below `threshold`
    /// before it is deactivated.
    pub hysteresis: Decimal,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: Decimal::from(5),
            freshness_window: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(6 * 60 * 60),
            hysteresis: Decimal::ZERO,
        }
    }
}

impl DetectorSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let Some(detector) = config.detector.as_ref() else {
            return Ok(defaults);
        };

        Ok(Self {
            threshold: match detector.threshold {
                Some(ref value) => parse_percent("detector.threshold", value)?,
                None => defaults.threshold,
            },
            freshness_window: duration::or_default(
                detector.freshness_window,
                defaults.freshness_window,
            ),
            sweep_interval: duration::or_default(detector.sweep_interval, defaults.sweep_interval),
            hysteresis: match detector.hysteresis {
                Some(ref value) => parse_percent("detector.hysteresis", value)?,
                None => defaults.hysteresis,
            },
        })
    }
}

/// Outcome counts of a full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub active: usize,
    pub failed: usize,
}

/// OpportunityDetector maintains `ArbitrageOpportunity` records.
pub struct OpportunityDetector {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    settings: DetectorSettings,
    /// Serializes read-compute-upsert per correlation key.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OpportunityDetector {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            storage,
            clock,
            metrics,
            settings,
            key_locks: DashMap::new(),
        }
    }

    /// Recomputes the opportunity for one correlation key and returns the
    /// stored record, if any exists afterwards.
    pub async fn evaluate(
        &self,
        correlation_key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, DetectorError> {
        let result = self.evaluate_key(correlation_key).await;
        self.refresh_gauge().await;
        result
    }

    /// Evaluates every known correlation key.
    pub async fn sweep(&self) -> Result<SweepReport, DetectorError> {
        let keys = self.storage.list_identifiers().await?;
        let mut report = SweepReport::default();

        for key in keys {
            match self.evaluate_key(&key).await {
                Ok(opp) => {
                    report.evaluated += 1;
                    if opp.is_some_and(|o| o.active) {
                        report.active += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(key = %key, error = %e, "Opportunity evaluation failed");
                }
            }
        }

        self.refresh_gauge().await;
        info!(
            evaluated = report.evaluated,
            active = report.active,
            failed = report.failed,
            "Opportunity sweep finished"
        );
        Ok(report)
    }

    /// Sweeps on the configured interval until `shutdown` flips to true.
    pub async fn run_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Opportunity sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Opportunity sweep loop exited");
    }

    async fn evaluate_key(
        &self,
        key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, DetectorError> {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let products = self.storage.list_products_by_identifier(key).await?;
        let fresh = latest_fresh_by_retailer(&products, self.freshness_cutoff(now));
        let existing = self.storage.get_opportunity(key).await?;

        if fresh.len() < 2 {
            return match existing {
                Some(mut opp) if opp.active => {
                    opp.active = false;
                    opp.last_updated = now;
                    self.storage.upsert_opportunity(&opp).await?;
                    info!(
                        key = %key,
                        fresh_retailers = fresh.len(),
                        "Opportunity deactivated, not enough fresh prices"
                    );
                    Ok(Some(opp))
                }
                other => Ok(other),
            };
        }

        // Strict comparisons over ascending retailer ids keep the lowest id on ties.
        let mut buy = fresh[0];
        let mut reference = fresh[0];
        for product in &fresh[1..] {
            if product.price < buy.price {
                buy = product;
            }
            if product.price > reference.price {
                reference = product;
            }
        }

        let diff = ArbitrageOpportunity::diff_percentage(buy.price, reference.price)
            .ok_or_else(|| DetectorError::InvalidPrice(key.to_string()))?;

        let was_active = existing.as_ref().is_some_and(|o| o.active);
        let active = diff > self.settings.threshold
            || (was_active && diff > self.settings.threshold - self.settings.hysteresis);

        if !active && existing.is_none() {
            debug!(key = %key, diff = %diff, "Gap below threshold");
            return Ok(None);
        }

        let detected_at = match existing {
            Some(ref o) if o.active || !active => o.detected_at,
            _ => now,
        };

        let opp = ArbitrageOpportunity {
            correlation_key: key.to_string(),
            buy_retailer_id: buy.retailer_id,
            buy_price: buy.price,
            reference_retailer_id: reference.retailer_id,
            reference_price: reference.price,
            diff_percentage: diff,
            active,
            detected_at,
            last_updated: now,
        };
        self.storage.upsert_opportunity(&opp).await?;

        match (was_active, active) {
            (false, true) => info!(
                key = %key,
                buy_retailer = opp.buy_retailer_id,
                buy_price = %opp.buy_price,
                reference_retailer = opp.reference_retailer_id,
                reference_price = %opp.reference_price,
                spread = %opp.spread(),
                diff = %diff,
                "Opportunity activated"
            ),
            (true, false) => info!(key = %key, diff = %diff, "Opportunity deactivated"),
            _ => debug!(key = %key, diff = %diff, active, "Opportunity updated"),
        }

        Ok(Some(opp))
    }

    fn freshness_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.settings.freshness_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn refresh_gauge(&self) {
        match self.storage.count_active_opportunities().await {
            Ok(count) => self.metrics.set_opportunities_active(count),
            Err(e) => warn!(error = %e, "Failed to count active opportunities"),
        }
    }
}

/// Most recent fresh product per retailer, ordered by retailer id.
fn latest_fresh_by_retailer(
    products: &[ProductRecord],
    cutoff: DateTime<Utc>,
) -> Vec<&ProductRecord> {
    let mut latest: BTreeMap<i64, &ProductRecord> = BTreeMap::new();
    for product in products
        .iter()
        .filter(|p| p.last_scraped_at >= cutoff && p.price > Decimal::ZERO)
    {
        latest
            .entry(product.retailer_id)
            .and_modify(|current| {
                if product.last_scraped_at > current.last_scraped_at {
                    *current = product;
                }
            })
            .or_insert(product);
    }
    latest.into_values().collect()
}

#[async_trait]
impl EventHandler for OpportunityDetector {
    fn name(&self) -> &'static str {
        "opportunity_detector"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        if let EventData::PriceChanged(change) = &event.data {
            if let Some(ref key) = change.product_identifier {
                self.evaluate(key)
                    .await
                    .map_err(|e| HandlerError::Failed(e.to_string()))?;
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests;
