//! Time-expiring key/value cache.
//!
//! Backs the scrape cooldown (key = retailer + product URL, value = last
//! successful scrape) and the memoized discovery link lists. Entries expire
//! lazily: an expired entry is removed by the read that finds it, so TTLs are
//! enforced even if nobody sweeps. Keys are independent, so concurrent readers
//! and writers never contend on a global lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

/// Concurrent TTL cache keyed by strings.
pub struct TtlCache<V> {
    name: &'static str,
    entries: DashMap<String, Entry<V>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    /// Creates an empty cache. `name` only shows up in logs.
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Returns the value if present and not yet expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();

        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => {}
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(cache = self.name, key = %key, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Returns true if a live entry exists for the key.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stores a value that expires after `ttl`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries.insert(key.into(), Entry { value, expires_at });
    }

    /// Removes an entry. Returns true if a live or expired entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!(cache = self.name, key = %key, "Cache entry invalidated");
        }
        removed
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including ones that expired but were not read since.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests;
