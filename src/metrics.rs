//! Runtime counters and gauges for the scraping core.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::events::FailureReason;

/// Process-wide counters. Shared by reference between components.
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_enqueued: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed_retries_exhausted: AtomicU64,
    jobs_failed_permanent: AtomicU64,
    jobs_failed_shutdown: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_skipped_cooldown: AtomicU64,
    jobs_dropped: AtomicU64,
    products_discovered: AtomicU64,
    opportunities_active: AtomicI64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued_total: u64,
    pub jobs_succeeded_total: u64,
    /// Keyed by failure reason label.
    pub jobs_failed_total: BTreeMap<String, u64>,
    pub jobs_retried_total: u64,
    pub jobs_skipped_cooldown_total: u64,
    pub jobs_dropped_total: u64,
    pub products_discovered_total: u64,
    pub opportunities_active_count: i64,
}

impl MetricsSnapshot {
    /// Sum of failures over all reasons.
    pub fn jobs_failed_sum(&self) -> u64 {
        self.jobs_failed_total.values().sum()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self, reason: FailureReason) {
        let counter = match reason {
            FailureReason::RetriesExhausted => &self.jobs_failed_retries_exhausted,
            FailureReason::Permanent => &self.jobs_failed_permanent,
            FailureReason::ShutdownInterrupted => &self.jobs_failed_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_skipped_cooldown(&self) {
        self.jobs_skipped_cooldown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn products_discovered(&self, count: usize) {
        self.products_discovered
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Sets the gauge of currently active opportunities.
    pub fn set_opportunities_active(&self, count: i64) {
        self.opportunities_active.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut failed = BTreeMap::new();
        for (reason, counter) in [
            (
                FailureReason::RetriesExhausted,
                &self.jobs_failed_retries_exhausted,
            ),
            (FailureReason::Permanent, &self.jobs_failed_permanent),
            (FailureReason::ShutdownInterrupted, &self.jobs_failed_shutdown),
        ] {
            failed.insert(reason.to_string(), counter.load(Ordering::Relaxed));
        }

        MetricsSnapshot {
            jobs_enqueued_total: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_succeeded_total: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed_total: failed,
            jobs_retried_total: self.jobs_retried.load(Ordering::Relaxed),
            jobs_skipped_cooldown_total: self.jobs_skipped_cooldown.load(Ordering::Relaxed),
            jobs_dropped_total: self.jobs_dropped.load(Ordering::Relaxed),
            products_discovered_total: self.products_discovered.load(Ordering::Relaxed),
            opportunities_active_count: self.opportunities_active.load(Ordering::Relaxed),
        }
    }
}
