//! Tests for the event bus and built-in handlers.

use super::*;
use crate::cache::TtlCache;
use crate::clock::ManualClock;
use crate::discovery::{self, DiscoveredLinks};
use crate::domain::{JobSource, ProductRecord, ScrapeJob};
use crate::storage::{MemoryStorage, Storage};
use crate::testing::RecordingHandler;
use chrono::TimeZone;
use std::str::FromStr;
use std::sync::Mutex;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 10, 12, minute, 0).unwrap()
}

fn record(price: &str, identifier: Option<&str>, minute: u32) -> ProductRecord {
    ProductRecord {
        id: None,
        retailer_id: 1,
        product_identifier: identifier.map(str::to_string),
        name: "Kettle".to_string(),
        price: dec(price),
        image_url: None,
        product_url: "https://shop1.example.com/p/kettle".to_string(),
        last_scraped_at: at(minute),
    }
}

fn failure(reason: FailureReason) -> Event {
    Event::scraping_failed(ScrapeFailureData {
        job: ScrapeJob::new(4, "https://shop4.example.com/p/1", JobSource::Discovery, at(0)),
        reason,
        attempt_count: 1,
        error: "price selector '.price' matched no elements".to_string(),
    })
}

struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn handle(&self, _event: &Event) -> Result<Vec<Event>, HandlerError> {
        Err(HandlerError::Failed("boom".into()))
    }
}

struct SlowHandler;

#[async_trait]
impl EventHandler for SlowHandler {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn handle(&self, _event: &Event) -> Result<Vec<Event>, HandlerError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

/// Re-publishes every discovery event it sees.
struct EchoHandler;

#[async_trait]
impl EventHandler for EchoHandler {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        Ok(vec![event.clone()])
    }
}

/// Records the order in which handlers saw events.
struct OrderHandler {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EventHandler for OrderHandler {
    fn name(&self) -> &'static str {
        self.label
    }

    async fn handle(&self, event: &Event) -> Result<Vec<Event>, HandlerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, event.event_type));
        Ok(Vec::new())
    }
}

// ==================== Bus tests ====================

#[tokio::test]
async fn test_publish_reaches_only_matching_subscribers() {
    let bus = EventBus::default();
    let scraped = Arc::new(RecordingHandler::new());
    let failed = Arc::new(RecordingHandler::new());
    bus.subscribe(EventType::ProductScraped, scraped.clone()).await;
    bus.subscribe(EventType::ScrapingFailed, failed.clone()).await;

    bus.publish(Event::product_scraped(record("10", None, 0))).await;

    assert_eq!(scraped.count(), 1);
    assert_eq!(failed.count(), 0);
    assert_eq!(bus.stats().delivered, 1);
}

#[tokio::test]
async fn test_publish_without_subscribers_is_noop() {
    let bus = EventBus::default();
    bus.publish(Event::product_discovered(1, "https://x.example.com/p")).await;
    assert_eq!(bus.stats().published, 1);
    assert_eq!(bus.stats().delivered, 0);
}

#[tokio::test]
async fn test_failing_handler_does_not_block_others() {
    let bus = EventBus::default();
    let recorder = Arc::new(RecordingHandler::new());
    bus.subscribe(EventType::ProductDiscovered, Arc::new(FailingHandler)).await;
    bus.subscribe(EventType::ProductDiscovered, recorder.clone()).await;

    bus.publish(Event::product_discovered(1, "https://x.example.com/p")).await;

    assert_eq!(recorder.count(), 1);
    assert_eq!(bus.stats().handler_errors, 1);
}

#[tokio::test]
async fn test_slow_handler_is_skipped_after_timeout() {
    let bus = EventBus::new(Duration::from_millis(20));
    let recorder = Arc::new(RecordingHandler::new());
    bus.subscribe(EventType::ProductDiscovered, Arc::new(SlowHandler)).await;
    bus.subscribe(EventType::ProductDiscovered, recorder.clone()).await;

    let started = tokio::time::Instant::now();
    bus.publish(Event::product_discovered(1, "https://x.example.com/p")).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(recorder.count(), 1);
    assert_eq!(bus.stats().handler_timeouts, 1);
}

#[tokio::test]
async fn test_follow_ups_dispatch_after_current_event() {
    let bus = EventBus::default();
    let log = Arc::new(Mutex::new(Vec::new()));
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    bus.subscribe(
        EventType::ProductScraped,
        Arc::new(PriceRecorder::new(storage)),
    )
    .await;
    bus.subscribe(
        EventType::ProductScraped,
        Arc::new(OrderHandler {
            label: "second",
            log: log.clone(),
        }),
    )
    .await;
    bus.subscribe(
        EventType::PriceChanged,
        Arc::new(OrderHandler {
            label: "change",
            log: log.clone(),
        }),
    )
    .await;

    bus.publish(Event::product_scraped(record("10", None, 0))).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "second:product_scraped".to_string(),
            "change:price_changed".to_string()
        ]
    );
}

#[tokio::test]
async fn test_follow_up_chain_is_bounded() {
    let bus = EventBus::default();
    bus.subscribe(EventType::ProductDiscovered, Arc::new(EchoHandler)).await;

    bus.publish(Event::product_discovered(1, "https://x.example.com/p")).await;

    let stats = bus.stats();
    assert_eq!(stats.published, MAX_EVENTS_PER_PUBLISH as u64);
    assert_eq!(stats.dropped_follow_ups, 1);
}

#[tokio::test]
async fn test_subscriber_count() {
    let bus = EventBus::default();
    bus.subscribe(EventType::PriceChanged, Arc::new(RecordingHandler::new())).await;
    bus.subscribe(EventType::PriceChanged, Arc::new(RecordingHandler::new())).await;
    assert_eq!(bus.subscriber_count(EventType::PriceChanged).await, 2);
    assert_eq!(bus.subscriber_count(EventType::ScrapingFailed).await, 0);
}

// ==================== Handler tests ====================

#[tokio::test]
async fn test_price_recorder_first_observation_emits_change() {
    let storage = Arc::new(MemoryStorage::new());
    let recorder = PriceRecorder::new(storage.clone());

    let follow_ups = recorder
        .handle(&Event::product_scraped(record("10", Some("UPC1"), 0)))
        .await
        .unwrap();

    assert_eq!(follow_ups.len(), 1);
    let EventData::PriceChanged(change) = &follow_ups[0].data else {
        panic!("expected PriceChanged");
    };
    assert_eq!(change.old_price, None);
    assert_eq!(change.new_price, dec("10"));
    assert_eq!(change.product_identifier.as_deref(), Some("UPC1"));

    let history = storage.price_history(change.product_id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_price_recorder_same_price_appends_history_without_change() {
    let storage = Arc::new(MemoryStorage::new());
    let recorder = PriceRecorder::new(storage.clone());

    recorder
        .handle(&Event::product_scraped(record("10.00", None, 0)))
        .await
        .unwrap();
    let follow_ups = recorder
        .handle(&Event::product_scraped(record("10", None, 5)))
        .await
        .unwrap();

    assert!(follow_ups.is_empty());
    let stored = storage
        .find_product(1, "https://shop1.example.com/p/kettle")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_scraped_at, at(5));
    assert_eq!(
        storage.price_history(stored.id.unwrap()).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_price_recorder_keeps_identifier_and_reports_old_price() {
    let storage = Arc::new(MemoryStorage::new());
    let recorder = PriceRecorder::new(storage.clone());

    recorder
        .handle(&Event::product_scraped(record("10", Some("UPC1"), 0)))
        .await
        .unwrap();
    let follow_ups = recorder
        .handle(&Event::product_scraped(record("12", None, 5)))
        .await
        .unwrap();

    let EventData::PriceChanged(change) = &follow_ups[0].data else {
        panic!("expected PriceChanged");
    };
    assert_eq!(change.old_price, Some(dec("10")));
    assert_eq!(change.new_price, dec("12"));
    assert_eq!(change.change_percent(), Some(dec("20")));
    assert_eq!(change.product_identifier.as_deref(), Some("UPC1"));

    let stored = storage
        .find_product(1, "https://shop1.example.com/p/kettle")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.product_identifier.as_deref(), Some("UPC1"));
}

#[tokio::test]
async fn test_discovery_cache_invalidated_on_permanent_failure_only() {
    let clock = Arc::new(ManualClock::new(at(0)));
    let cache: Arc<TtlCache<DiscoveredLinks>> = Arc::new(TtlCache::new("discovery", clock));
    let links = DiscoveredLinks {
        page_url: "https://shop4.example.com/catalog".to_string(),
        links: vec!["https://shop4.example.com/p/1".to_string()],
    };
    cache.set(discovery::cache_key(4), links, Duration::from_secs(600));

    let handler = DiscoveryCacheInvalidator::new(cache.clone());

    handler
        .handle(&failure(FailureReason::RetriesExhausted))
        .await
        .unwrap();
    assert!(cache.contains(&discovery::cache_key(4)));

    handler.handle(&failure(FailureReason::Permanent)).await.unwrap();
    assert!(!cache.contains(&discovery::cache_key(4)));
}

#[tokio::test]
async fn test_price_movement_logger_returns_no_follow_ups() {
    let handler = PriceMovementLogger::new(dec("10"));
    let event = Event::price_changed(PriceChangeData {
        product_id: 1,
        retailer_id: 1,
        product_identifier: None,
        old_price: Some(dec("100")),
        new_price: dec("75"),
    });
    assert!(handler.handle(&event).await.unwrap().is_empty());
}

#[test]
fn test_change_percent() {
    let change = PriceChangeData {
        product_id: 1,
        retailer_id: 1,
        product_identifier: None,
        old_price: Some(dec("100")),
        new_price: dec("75"),
    };
    assert_eq!(change.change_percent(), Some(dec("-25")));

    let first = PriceChangeData {
        old_price: None,
        ..change
    };
    assert_eq!(first.change_percent(), None);
}
