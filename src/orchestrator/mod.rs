//! Concurrent scrape orchestrator.
//!
//! A fixed pool of workers drains a shared FIFO queue. Each worker runs one
//! job to completion before pulling the next: cooldown check, fetch under the
//! job timeout, extraction, then an outcome event on the bus. Retriable
//! failures are re-queued after an exponential backoff; permanent failures and
//! exhausted retries end the job with a `ScrapingFailed` event.
//!
//! A job key (retailer, product URL) stays "in flight" from the moment it is
//! accepted until its terminal outcome, so at most one job per key exists at a
//! time and its retries run strictly one after another.

mod error;
mod queue;
mod retry;

pub use error::ScrapeError;
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{Config, RetailerConfig, duration};
use crate::domain::{JobKey, ProductRecord, ScrapeJob};
use crate::events::{Event, EventBus, FailureReason, ScrapeFailureData};
use crate::extract::extract_product;
use crate::fetch::{FetchError, PageFetcher};
use crate::metrics::Metrics;
use queue::JobQueue;

/// Worker pool, timeout, backpressure and retry settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub job_timeout: Duration,
    pub max_queue_depth: usize,
    pub cooldown: Duration,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            job_timeout: Duration::from_secs(30),
            max_queue_depth: 1000,
            cooldown: Duration::from_secs(30 * 60),
            shutdown_grace: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let Some(scraper) = config.scraper.as_ref() else {
            return defaults;
        };

        Self {
            workers: scraper.workers.unwrap_or(defaults.workers),
            job_timeout: duration::or_default(scraper.job_timeout, defaults.job_timeout),
            max_queue_depth: scraper.max_queue_depth.unwrap_or(defaults.max_queue_depth),
            cooldown: duration::or_default(scraper.cooldown, defaults.cooldown),
            shutdown_grace: duration::or_default(scraper.shutdown_grace, defaults.shutdown_grace),
            retry: RetryPolicy::from_config(scraper.retry.as_ref()),
        }
    }
}

/// Result of offering a job to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job for the same key is already queued, running or waiting to retry.
    Duplicate,
    /// The URL was scraped successfully within the cooldown window.
    CoolingDown,
    /// Queue over its depth limit; only discovery and refresh jobs are dropped.
    Dropped,
    ShuttingDown,
}

/// Point-in-time load of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStatus {
    pub queue_depth: usize,
    pub active_workers: usize,
    pub workers: usize,
    pub in_flight: usize,
    pub awaiting_retry: usize,
}

impl PoolStatus {
    /// Fraction of workers currently executing a job.
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.active_workers as f64 / self.workers as f64
    }
}

/// What `shutdown` did with unfinished work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub abandoned: usize,
    pub interrupted: usize,
}

struct DelayedJob {
    job: ScrapeJob,
    timer: Option<AbortHandle>,
}

/// Orchestrator owns the job queue and the worker pool.
pub struct Orchestrator {
    fetcher: Arc<dyn PageFetcher>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    cooldown: Arc<TtlCache<DateTime<Utc>>>,
    settings: OrchestratorSettings,

    queue: JobQueue,
    retailers: RwLock<HashMap<i64, RetailerConfig>>,
    in_flight: DashMap<JobKey, ()>,
    active: DashMap<JobKey, ScrapeJob>,
    delayed: DashMap<JobKey, DelayedJob>,
    drained: Notify,

    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        cooldown: Arc<TtlCache<DateTime<Utc>>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            fetcher,
            bus,
            clock,
            metrics,
            cooldown,
            queue: JobQueue::new(settings.max_queue_depth),
            settings,
            retailers: RwLock::new(HashMap::new()),
            in_flight: DashMap::new(),
            active: DashMap::new(),
            delayed: DashMap::new(),
            drained: Notify::new(),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker pool. Calling it again while workers run is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() || self.is_shutting_down() {
            return;
        }

        for worker_id in 0..self.settings.workers {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.worker_loop(worker_id).await }));
        }
        info!(workers = self.settings.workers, "Scrape workers started");
    }

    /// Replaces the set of retailers jobs may run for.
    pub async fn register_retailers(&self, retailers: &[RetailerConfig]) {
        let mut registry = self.retailers.write().await;
        registry.clear();
        for retailer in retailers {
            registry.insert(retailer.id, retailer.clone());
        }
    }

    /// Offers a job to the queue.
    pub async fn enqueue(&self, job: ScrapeJob) -> EnqueueOutcome {
        if self.is_shutting_down() {
            return EnqueueOutcome::ShuttingDown;
        }

        let key = job.key();
        if self.cooldown.contains(&key.cooldown_key()) {
            self.metrics.job_skipped_cooldown();
            debug!(job = %key, "Skipped, scraped within cooldown");
            return EnqueueOutcome::CoolingDown;
        }

        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => return EnqueueOutcome::Duplicate,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let source = job.source;
        if self.queue.try_push(job).await.is_err() {
            self.finish(&key);
            self.metrics.job_dropped();
            debug!(job = %key, source = %source, "Queue full, job dropped");
            return EnqueueOutcome::Dropped;
        }

        self.metrics.job_enqueued();
        debug!(job = %key, source = %source, "Job enqueued");
        EnqueueOutcome::Queued
    }

    /// Current load of the pool.
    pub async fn status(&self) -> PoolStatus {
        PoolStatus {
            queue_depth: self.queue.len().await,
            active_workers: self.active.len(),
            workers: self.settings.workers,
            in_flight: self.in_flight.len(),
            awaiting_retry: self.delayed.len(),
        }
    }

    /// Waits until no job is in flight. Returns false if `limit` passed first.
    pub async fn wait_drained(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight.is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Removes every queued job without running it and returns how many were removed.
    /// Jobs that are running or waiting for a retry are left alone.
    pub async fn abandon_queued(&self, why: &str) -> usize {
        let jobs = self.queue.drain().await;
        for job in &jobs {
            warn!(
                retailer_id = job.retailer_id,
                url = %job.product_url,
                source = %job.source,
                attempt = job.attempt_count,
                reason = why,
                "Queued job abandoned"
            );
            self.finish(&job.key());
        }
        jobs.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stops pulling jobs, gives running jobs `grace` to finish, then cancels
    /// them. Cancelled and retry-pending jobs are reported as
    /// `ScrapingFailed(ShutdownInterrupted)`; queued jobs are abandoned.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        if self.shutdown_tx.send_replace(true) {
            return ShutdownReport::default();
        }
        info!(grace = ?grace, "Stopping scrape workers");

        for entry in self.delayed.iter() {
            if let Some(ref timer) = entry.timer {
                timer.abort();
            }
        }

        let mut report = ShutdownReport {
            abandoned: self.abandon_queued("shutdown").await,
            ..ShutdownReport::default()
        };

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let deadline = tokio::time::Instant::now() + grace;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut interrupted: Vec<ScrapeJob> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        interrupted.extend(self.delayed.iter().map(|entry| entry.job.clone()));
        self.active.clear();
        self.delayed.clear();

        for job in interrupted {
            let key = job.key();
            self.fail(job, FailureReason::ShutdownInterrupted, "shutdown".into())
                .await;
            self.finish(&key);
            report.interrupted += 1;
        }

        // Jobs a cancelled worker had already popped.
        self.in_flight.clear();
        self.drained.notify_waiters();

        info!(
            abandoned = report.abandoned,
            interrupted = report.interrupted,
            "Scrape workers stopped"
        );
        report
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(worker_id, "Worker started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let job = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = self.queue.pop() => job,
            };

            self.execute(job).await;
        }

        debug!(worker_id, "Worker stopped");
    }

    async fn execute(self: &Arc<Self>, mut job: ScrapeJob) {
        let key = job.key();
        job.attempt_count += 1;

        if self.cooldown.contains(&key.cooldown_key()) {
            self.metrics.job_skipped_cooldown();
            debug!(job = %key, "Skipped at execution, scraped within cooldown");
            self.finish(&key);
            return;
        }

        let retailer = self.retailers.read().await.get(&job.retailer_id).cloned();
        let Some(retailer) = retailer else {
            let error = format!("retailer {} is not registered", job.retailer_id);
            self.fail(job, FailureReason::Permanent, error).await;
            self.finish(&key);
            return;
        };

        self.active.insert(key.clone(), job.clone());
        let outcome = self.attempt(&retailer, &job).await;
        self.active.remove(&key);

        match outcome {
            Ok(record) => {
                self.cooldown
                    .set(key.cooldown_key(), record.last_scraped_at, self.settings.cooldown);
                self.metrics.job_succeeded();
                debug!(
                    job = %key,
                    attempt = job.attempt_count,
                    price = %record.price,
                    "Product scraped"
                );
                self.bus.publish(Event::product_scraped(record)).await;
                self.finish(&key);
            }
            Err(ScrapeError::Retriable { error, retry_after })
                if self.settings.retry.should_retry(job.attempt_count) =>
            {
                let delay = self.settings.retry.delay(job.attempt_count, retry_after);
                warn!(
                    job = %key,
                    attempt = job.attempt_count,
                    max_attempts = self.settings.retry.max_attempts,
                    delay = ?delay,
                    error = %error,
                    "Retriable scrape failure, retrying"
                );
                self.metrics.job_retried();
                self.schedule_retry(job, delay);
            }
            Err(ScrapeError::Retriable { error, .. }) => {
                self.fail(job, FailureReason::RetriesExhausted, error).await;
                self.finish(&key);
            }
            Err(ScrapeError::Permanent(error)) => {
                self.fail(job, FailureReason::Permanent, error).await;
                self.finish(&key);
            }
        }
    }

    async fn attempt(
        &self,
        retailer: &RetailerConfig,
        job: &ScrapeJob,
    ) -> Result<ProductRecord, ScrapeError> {
        let timeout = self.settings.job_timeout;
        let page = tokio::time::timeout(timeout, self.fetcher.fetch(&job.product_url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        Ok(extract_product(
            &page,
            retailer,
            &job.product_url,
            self.clock.now(),
        )?)
    }

    fn schedule_retry(self: &Arc<Self>, job: ScrapeJob, delay: Duration) {
        let key = job.key();
        // The entry guard is held until the timer handle is stored, so a timer
        // that fires at once blocks in `requeue` until its entry is complete.
        let mut entry = self
            .delayed
            .entry(key.clone())
            .insert(DelayedJob { job, timer: None });

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.requeue(&key).await;
        });
        entry.timer = Some(handle.abort_handle());
    }

    /// Moves a job whose backoff elapsed back onto the queue.
    async fn requeue(&self, key: &JobKey) {
        if self.is_shutting_down() {
            return;
        }
        // Taken out before the push: once queued, the job may fail again and
        // register a fresh entry under the same key.
        let Some((_, delayed)) = self.delayed.remove(key) else {
            return;
        };
        self.queue.push(delayed.job).await;
    }

    async fn fail(&self, job: ScrapeJob, reason: FailureReason, error: String) {
        warn!(
            retailer_id = job.retailer_id,
            url = %job.product_url,
            source = %job.source,
            attempt = job.attempt_count,
            reason = %reason,
            error = %error,
            "Scrape job failed"
        );
        self.metrics.job_failed(reason);
        self.bus
            .publish(Event::scraping_failed(ScrapeFailureData {
                attempt_count: job.attempt_count,
                job,
                reason,
                error,
            }))
            .await;
    }

    fn finish(&self, key: &JobKey) {
        self.in_flight.remove(key);
        if self.in_flight.is_empty() {
            self.drained.notify_waiters();
        }
    }
}
