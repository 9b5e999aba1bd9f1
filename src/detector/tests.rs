//! Tests for the opportunity detector.

use super::*;
use crate::clock::ManualClock;
use crate::domain::PriceHistoryEntry;
use crate::events::{EventBus, EventType, PriceChangeData, PriceRecorder};
use crate::storage::MemoryStorage;
use crate::testing::wait_until;
use chrono::TimeZone;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap()
}

struct Harness {
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    metrics: Arc<Metrics>,
    detector: Arc<OpportunityDetector>,
}

fn harness(settings: DetectorSettings) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(start()));
    let metrics = Arc::new(Metrics::new());
    let detector = Arc::new(OpportunityDetector::new(
        storage.clone(),
        clock.clone(),
        metrics.clone(),
        settings,
    ));
    Harness {
        storage,
        clock,
        metrics,
        detector,
    }
}

impl Harness {
    async fn price(&self, retailer_id: i64, key: &str, price: &str) {
        self.price_at(retailer_id, key, price, self.clock.now()).await;
    }

    async fn price_at(&self, retailer_id: i64, key: &str, price: &str, at: DateTime<Utc>) {
        self.storage
            .save_product(&record(retailer_id, key, price, at))
            .await
            .unwrap();
    }
}

fn record(retailer_id: i64, key: &str, price: &str, at: DateTime<Utc>) -> ProductRecord {
    ProductRecord {
        id: None,
        retailer_id,
        product_identifier: Some(key.to_string()),
        name: format!("Item {}", key),
        price: dec(price),
        image_url: None,
        product_url: format!("https://shop{}.example.com/p/{}", retailer_id, key),
        last_scraped_at: at,
    }
}

#[tokio::test]
async fn test_gap_above_threshold_activates() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10.00").await;
    h.price(2, "SKU-1", "13.00").await;

    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();

    assert!(opp.active);
    assert_eq!(opp.buy_retailer_id, 1);
    assert_eq!(opp.buy_price, dec("10.00"));
    assert_eq!(opp.reference_retailer_id, 2);
    assert_eq!(opp.reference_price, dec("13.00"));
    assert_eq!(opp.diff_percentage, dec("30"));
    assert_eq!(opp.detected_at, start());

    let stored = h.storage.get_opportunity("SKU-1").await.unwrap().unwrap();
    assert_eq!(stored, opp);
    assert_eq!(h.metrics.snapshot().opportunities_active_count, 1);
}

#[tokio::test]
async fn test_closed_gap_deactivates_but_keeps_record() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10.00").await;
    h.price(2, "SKU-1", "13.00").await;
    h.detector.evaluate("SKU-1").await.unwrap();

    h.clock.advance(chrono::Duration::minutes(5));
    h.price(1, "SKU-1", "10.50").await;
    h.price(2, "SKU-1", "10.50").await;
    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();

    assert!(!opp.active);
    assert_eq!(opp.diff_percentage, Decimal::ZERO);
    assert_eq!(opp.detected_at, start());
    assert_eq!(opp.last_updated, start() + chrono::Duration::minutes(5));

    let all = h.storage.list_opportunities(false).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(h.storage.list_opportunities(true).await.unwrap().is_empty());
    assert_eq!(h.metrics.snapshot().opportunities_active_count, 0);
}

#[tokio::test]
async fn test_gap_at_threshold_is_not_an_opportunity() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "100").await;
    h.price(2, "SKU-1", "105").await;

    assert!(h.detector.evaluate("SKU-1").await.unwrap().is_none());
    assert!(h.storage.get_opportunity("SKU-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_single_retailer_yields_nothing() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10").await;

    assert!(h.detector.evaluate("SKU-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ties_resolve_to_lowest_retailer_id() {
    let h = harness(DetectorSettings::default());
    h.price(3, "SKU-1", "10").await;
    h.price(2, "SKU-1", "10").await;
    h.price(4, "SKU-1", "20").await;
    h.price(5, "SKU-1", "20").await;

    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();

    assert_eq!(opp.buy_retailer_id, 2);
    assert_eq!(opp.reference_retailer_id, 4);
    assert_eq!(opp.diff_percentage, dec("100"));
}

#[tokio::test]
async fn test_stale_prices_are_ignored() {
    let h = harness(DetectorSettings::default());
    h.price_at(1, "SKU-1", "10", start() - chrono::Duration::hours(25))
        .await;
    h.price(2, "SKU-1", "13").await;

    assert!(h.detector.evaluate("SKU-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_going_stale_deactivates() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10").await;
    h.price(2, "SKU-1", "13").await;
    h.detector.evaluate("SKU-1").await.unwrap();

    h.clock.advance(chrono::Duration::hours(20));
    h.price(2, "SKU-1", "14").await;
    h.clock.advance(chrono::Duration::hours(5));

    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();
    assert!(!opp.active);
    // The record keeps the last comparison it was built from.
    assert_eq!(opp.reference_price, dec("13"));
}

#[tokio::test]
async fn test_latest_price_per_retailer_wins() {
    let h = harness(DetectorSettings::default());
    h.price_at(1, "SKU-1", "5", start() - chrono::Duration::hours(2))
        .await;
    h.storage
        .save_product(&ProductRecord {
            id: None,
            retailer_id: 1,
            product_identifier: Some("SKU-1".to_string()),
            name: "Item SKU-1 (bundle page)".to_string(),
            price: dec("12"),
            image_url: None,
            product_url: "https://shop1.example.com/bundle/SKU-1".to_string(),
            last_scraped_at: start(),
        })
        .await
        .unwrap();
    h.price(2, "SKU-1", "12.50").await;

    let opp = h.detector.evaluate("SKU-1").await.unwrap();
    assert!(opp.is_none(), "12 vs 12.50 is below the threshold");
}

#[tokio::test]
async fn test_diff_is_clamped() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "1").await;
    h.price(2, "SKU-1", "20").await;

    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();
    assert_eq!(opp.diff_percentage, dec("1000"));
}

#[tokio::test]
async fn test_hysteresis_holds_active_opportunities() {
    let h = harness(DetectorSettings {
        hysteresis: dec("2"),
        ..DetectorSettings::default()
    });
    h.price(1, "SKU-1", "10").await;

    h.price(2, "SKU-1", "10.60").await;
    assert!(h.detector.evaluate("SKU-1").await.unwrap().unwrap().active);

    h.price(2, "SKU-1", "10.40").await;
    assert!(h.detector.evaluate("SKU-1").await.unwrap().unwrap().active);

    h.price(2, "SKU-1", "10.20").await;
    assert!(!h.detector.evaluate("SKU-1").await.unwrap().unwrap().active);

    h.price(2, "SKU-1", "10.40").await;
    assert!(!h.detector.evaluate("SKU-1").await.unwrap().unwrap().active);
}

#[tokio::test]
async fn test_reactivation_resets_detected_at() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10").await;
    h.price(2, "SKU-1", "13").await;
    h.detector.evaluate("SKU-1").await.unwrap();

    h.clock.advance(chrono::Duration::minutes(10));
    h.price(2, "SKU-1", "10").await;
    h.detector.evaluate("SKU-1").await.unwrap();

    h.clock.advance(chrono::Duration::minutes(10));
    h.price(2, "SKU-1", "15").await;
    let opp = h.detector.evaluate("SKU-1").await.unwrap().unwrap();

    assert!(opp.active);
    assert_eq!(opp.detected_at, start() + chrono::Duration::minutes(20));
}

#[tokio::test]
async fn test_sweep_covers_every_identifier() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10").await;
    h.price(2, "SKU-1", "13").await;
    h.price(1, "SKU-2", "10").await;
    h.price(2, "SKU-2", "10.10").await;
    h.price(1, "SKU-3", "10").await;

    let report = h.detector.sweep().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            evaluated: 3,
            active: 1,
            failed: 0,
        }
    );
    assert_eq!(h.metrics.snapshot().opportunities_active_count, 1);
}

#[tokio::test]
async fn test_price_change_event_triggers_evaluation() {
    let h = harness(DetectorSettings::default());
    let bus = EventBus::default();
    bus.subscribe(
        EventType::ProductScraped,
        Arc::new(PriceRecorder::new(h.storage.clone())),
    )
    .await;
    bus.subscribe(EventType::PriceChanged, h.detector.clone()).await;

    for (retailer_id, price) in [(1, "20.00"), (2, "24.00")] {
        bus.publish(Event::product_scraped(ProductRecord {
            id: None,
            retailer_id,
            product_identifier: Some("0123456789012".to_string()),
            name: "Espresso Machine".to_string(),
            price: dec(price),
            image_url: None,
            product_url: format!("https://shop{}.example.com/p/espresso", retailer_id),
            last_scraped_at: start(),
        }))
        .await;
    }

    let opp = h
        .storage
        .get_opportunity("0123456789012")
        .await
        .unwrap()
        .unwrap();
    assert!(opp.active);
    assert_eq!(opp.diff_percentage, dec("20"));
    assert_eq!(bus.stats().handler_errors, 0);
}

#[tokio::test]
async fn test_price_change_without_identifier_is_ignored() {
    let h = harness(DetectorSettings::default());
    let event = Event::price_changed(PriceChangeData {
        product_id: 1,
        retailer_id: 1,
        product_identifier: None,
        old_price: None,
        new_price: dec("10"),
    });

    let follow_ups = h.detector.handle(&event).await.unwrap();

    assert!(follow_ups.is_empty());
    assert!(h.storage.list_opportunities(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_periodic_sweep_stops_on_shutdown() {
    let h = harness(DetectorSettings::default());
    h.price(1, "SKU-1", "10").await;
    h.price(2, "SKU-1", "13").await;

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(h.detector.clone().run_periodic(rx));

    let metrics = h.metrics.clone();
    let swept = wait_until(Duration::from_secs(2), || {
        metrics.snapshot().opportunities_active_count == 1
    })
    .await;
    assert!(swept, "first sweep runs at startup");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweep loop should exit")
        .unwrap();
}

/// MemoryStorage whose next `get_opportunity` parks until released.
#[derive(Default)]
struct GatedStorage {
    inner: MemoryStorage,
    hold_next_read: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Storage for GatedStorage {
    async fn find_product(
        &self,
        retailer_id: i64,
        product_url: &str,
    ) -> Result<Option<ProductRecord>, StorageError> {
        self.inner.find_product(retailer_id, product_url).await
    }

    async fn save_product(&self, product: &ProductRecord) -> Result<ProductRecord, StorageError> {
        self.inner.save_product(product).await
    }

    async fn list_product_urls(&self, retailer_id: i64) -> Result<Vec<String>, StorageError> {
        self.inner.list_product_urls(retailer_id).await
    }

    async fn list_products_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Vec<ProductRecord>, StorageError> {
        self.inner.list_products_by_identifier(identifier).await
    }

    async fn list_identifiers(&self) -> Result<Vec<String>, StorageError> {
        self.inner.list_identifiers().await
    }

    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<(), StorageError> {
        self.inner.append_price_history(entry).await
    }

    async fn price_history(&self, product_id: i64) -> Result<Vec<PriceHistoryEntry>, StorageError> {
        self.inner.price_history(product_id).await
    }

    async fn get_opportunity(
        &self,
        correlation_key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, StorageError> {
        if self.hold_next_read.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get_opportunity(correlation_key).await
    }

    async fn upsert_opportunity(&self, opp: &ArbitrageOpportunity) -> Result<(), StorageError> {
        self.inner.upsert_opportunity(opp).await
    }

    async fn list_opportunities(
        &self,
        active_only: bool,
    ) -> Result<Vec<ArbitrageOpportunity>, StorageError> {
        self.inner.list_opportunities(active_only).await
    }

    async fn count_active_opportunities(&self) -> Result<i64, StorageError> {
        self.inner.count_active_opportunities().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_concurrent_evaluations_of_one_key_apply_in_order() {
    let storage = Arc::new(GatedStorage::default());
    let detector = Arc::new(OpportunityDetector::new(
        storage.clone(),
        Arc::new(ManualClock::new(start())),
        Arc::new(Metrics::new()),
        DetectorSettings::default(),
    ));
    storage.save_product(&record(1, "SKU-1", "10.00", start())).await.unwrap();
    storage.save_product(&record(2, "SKU-1", "13.00", start())).await.unwrap();

    // The first evaluation reads the 30% gap, then parks before its upsert.
    storage.hold_next_read.store(true, Ordering::SeqCst);
    let first = tokio::spawn({
        let detector = detector.clone();
        async move { detector.evaluate("SKU-1").await }
    });
    storage.entered.notified().await;

    // The gap closes while the first evaluation is still in progress.
    storage.save_product(&record(2, "SKU-1", "10.20", start())).await.unwrap();
    let second = tokio::spawn({
        let detector = detector.clone();
        async move { detector.evaluate("SKU-1").await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!second.is_finished(), "second evaluation waits for the first");

    storage.release.notify_one();
    let first = first.await.unwrap().unwrap().unwrap();
    let second = second.await.unwrap().unwrap().unwrap();

    assert!(first.active);
    assert!(!second.active);
    assert_eq!(second.reference_price, dec("10.20"));
    let stored = storage.get_opportunity("SKU-1").await.unwrap().unwrap();
    assert_eq!(stored, second);
}

#[test]
fn test_settings_from_config() {
    let config = Config::from_yaml(
        r#"
app:
  name: pricewatch
  env: test
detector:
  threshold: "7.5"
  freshness_window: 12h
  hysteresis: "1"
"#,
    )
    .unwrap();

    let settings = DetectorSettings::from_config(&config).unwrap();

    assert_eq!(settings.threshold, dec("7.5"));
    assert_eq!(settings.freshness_window, Duration::from_secs(12 * 3600));
    assert_eq!(settings.sweep_interval, Duration::from_secs(6 * 3600));
    assert_eq!(settings.hysteresis, dec("1"));
}
