//! In-process publish/subscribe for scrape outcomes.
//!
//! Dispatch is inline on the publisher's task. Every handler call runs under a
//! timeout; a handler that errors or runs too long is logged and skipped, and
//! the remaining handlers still see the event. Handlers may return follow-up
//! events, which are dispatched by the same `publish` call after the current
//! event has reached every subscriber.

mod handlers;

pub use handlers::{DiscoveryCacheInvalidator, PriceMovementLogger, PriceRecorder};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::{ProductRecord, ScrapeJob};
use crate::storage::StorageError;

/// Default handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on events dispatched by one `publish` call, follow-ups included.
const MAX_EVENTS_PER_PUBLISH: usize = 64;

/// Kind of event, used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ProductScraped,
    ScrapingFailed,
    PriceChanged,
    ProductDiscovered,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::ProductScraped => write!(f, "product_scraped"),
            EventType::ScrapingFailed => write!(f, "scraping_failed"),
            EventType::PriceChanged => write!(f, "price_changed"),
            EventType::ProductDiscovered => write!(f, "product_discovered"),
        }
    }
}

/// Why a job ended without a product record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Retriable failures used up every attempt.
    RetriesExhausted,
    /// Selector, markup, validation or client error; never retried.
    Permanent,
    /// The job was still running or waiting for a retry at shutdown.
    ShutdownInterrupted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetriesExhausted => write!(f, "retries_exhausted"),
            FailureReason::Permanent => write!(f, "permanent"),
            FailureReason::ShutdownInterrupted => write!(f, "shutdown_interrupted"),
        }
    }
}

/// Terminal failure of a scrape job.
#[derive(Debug, Clone)]
pub struct ScrapeFailureData {
    pub job: ScrapeJob,
    pub reason: FailureReason,
    pub attempt_count: u32,
    pub error: String,
}

/// Stored price of a product moved (or was observed for the first time).
#[derive(Debug, Clone)]
pub struct PriceChangeData {
    pub product_id: i64,
    pub retailer_id: i64,
    pub product_identifier: Option<String>,
    /// `None` on the first observation.
    pub old_price: Option<Decimal>,
    pub new_price: Decimal,
}

impl PriceChangeData {
    /// Relative change in percent, `None` on the first observation.
    pub fn change_percent(&self) -> Option<Decimal> {
        let old = self.old_price.filter(|p| *p > Decimal::ZERO)?;
        Some(((self.new_price - old) / old * Decimal::ONE_HUNDRED).round_dp(2))
    }
}

/// A product URL found on a discovery page.
#[derive(Debug, Clone)]
pub struct DiscoveredData {
    pub retailer_id: i64,
    pub url: String,
}

/// Event payload.
#[derive(Debug, Clone)]
pub enum EventData {
    ProductScraped(ProductRecord),
    ScrapingFailed(ScrapeFailureData),
    PriceChanged(PriceChangeData),
    ProductDiscovered(DiscoveredData),
}

/// Event carried by the bus.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl Event {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn product_scraped(record: ProductRecord) -> Self {
        Self::new(EventType::ProductScraped, EventData::ProductScraped(record))
    }

    pub fn scraping_failed(data: ScrapeFailureData) -> Self {
        Self::new(EventType::ScrapingFailed, EventData::ScrapingFailed(data))
    }

    pub fn price_changed(data: PriceChangeData) -> Self {
        Self::new(EventType::PriceChanged, EventData::PriceChanged(data))
    }

    pub fn product_discovered(retailer_id: i64, url: impl Into<String>) -> Self {
        Self::new(
            EventType::ProductDiscovered,
            EventData::ProductDiscovered(DiscoveredData {
                retailer_id,
                url: url.into(),
            }),
        )
    }
}

/// Handler failure. Logged by the bus, never propagated to the publisher.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Failed(String),
}

/// Subscriber to bus events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one event and returns any follow-up events to publish.
    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError>;
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_errors: u64,
    pub handler_timeouts: u64,
    pub dropped_follow_ups: u64,
}

/// EventBus fans events out to the handlers subscribed to their type.
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    handler_timeout: Duration,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_errors: AtomicU64,
    handler_timeouts: AtomicU64,
    dropped_follow_ups: AtomicU64,
}

impl EventBus {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            handler_timeout,
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            handler_timeouts: AtomicU64::new(0),
            dropped_follow_ups: AtomicU64::new(0),
        }
    }

    /// Registers a handler for one event type. Handlers run in registration order.
    pub async fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        debug!(event_type = %event_type, handler = handler.name(), "Handler subscribed");
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Number of handlers subscribed to an event type.
    pub async fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .await
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Dispatches an event and then its follow-ups, breadth first.
    pub async fn publish(&self, event: Event) {
        let mut pending = VecDeque::from([event]);
        let mut dispatched = 0usize;

        while let Some(event) = pending.pop_front() {
            if dispatched == MAX_EVENTS_PER_PUBLISH {
                let dropped = pending.len() as u64 + 1;
                self.dropped_follow_ups.fetch_add(dropped, Ordering::Relaxed);
                warn!(
                    event_type = %event.event_type,
                    dropped,
                    "Follow-up event chain too long, dropping the rest"
                );
                break;
            }
            dispatched += 1;
            self.published.fetch_add(1, Ordering::Relaxed);

            let handlers = match self.handlers.read().await.get(&event.event_type) {
                Some(list) => list.clone(),
                None => continue,
            };

            for handler in handlers {
                match tokio::time::timeout(self.handler_timeout, handler.handle(&event)).await {
                    Ok(Ok(follow_ups)) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        pending.extend(follow_ups);
                    }
                    Ok(Err(e)) => {
                        self.handler_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            event_type = %event.event_type,
                            handler = handler.name(),
                            error = %e,
                            "Event handler failed"
                        );
                    }
                    Err(_) => {
                        self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            event_type = %event.event_type,
                            handler = handler.name(),
                            timeout = ?self.handler_timeout,
                            "Event handler timed out, skipped"
                        );
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            dropped_follow_ups: self.dropped_follow_ups.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TIMEOUT)
    }
}

#[cfg(test)]
mod tests;
