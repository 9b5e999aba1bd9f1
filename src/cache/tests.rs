//! Tests for the TTL cache.

use super::*;
use crate::clock::ManualClock;
use chrono::TimeZone;

fn cache_with_clock() -> (TtlCache<String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
    ));
    (TtlCache::new("test", clock.clone()), clock)
}

#[test]
fn test_get_returns_value_before_expiry() {
    let (cache, clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(60));

    clock.advance(chrono::Duration::seconds(59));
    assert_eq!(cache.get("a"), Some("one".to_string()));
}

#[test]
fn test_get_expires_lazily_without_sweep() {
    let (cache, clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(60));

    clock.advance(chrono::Duration::seconds(60));
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expired, 1);
}

#[test]
fn test_set_replaces_value_and_ttl() {
    let (cache, clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(10));
    clock.advance(chrono::Duration::seconds(5));
    cache.set("a", "two".to_string(), Duration::from_secs(10));
    clock.advance(chrono::Duration::seconds(8));

    assert_eq!(cache.get("a"), Some("two".to_string()));
}

#[test]
fn test_invalidate_removes_entry() {
    let (cache, _clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(60));

    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"));
    assert!(!cache.contains("a"));
}

#[test]
fn test_purge_expired_keeps_live_entries() {
    let (cache, clock) = cache_with_clock();
    cache.set("short", "x".to_string(), Duration::from_secs(1));
    cache.set("long", "y".to_string(), Duration::from_secs(600));

    clock.advance(chrono::Duration::seconds(2));
    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("long"));
}

#[test]
fn test_stats_count_hits_and_misses() {
    let (cache, _clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(60));

    cache.get("a");
    cache.get("a");
    cache.get("missing");

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_huge_ttl_does_not_overflow() {
    let (cache, clock) = cache_with_clock();
    cache.set("a", "one".to_string(), Duration::from_secs(u64::MAX));

    clock.advance(chrono::Duration::days(365 * 100));
    assert!(cache.contains("a"));
}

#[tokio::test]
async fn test_concurrent_writers_on_distinct_keys() {
    let (cache, _clock) = cache_with_clock();
    let cache = Arc::new(cache);

    let mut handles = Vec::new();
    for i in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            for j in 0..50 {
                cache.set(format!("{}-{}", i, j), "v".to_string(), Duration::from_secs(60));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.len(), 400);
}
