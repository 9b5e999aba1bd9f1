//! Scrape cycle scheduler.
//!
//! Moves between `Idle` and `Running`. A cycle is started by the interval
//! timer or by `trigger_cycle`; while one runs, further triggers are refused
//! instead of queued. A cycle lists the active retailers, runs discovery for
//! each of them concurrently, feeds manual (submitted or pinned in the
//! retailer config), discovered and known URLs to the orchestrator and
//! returns to `Idle` once the queue drained or the cycle ceiling passed.

mod error;

pub use error::SchedulerError;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clock::Clock;
use crate::config::{Config, RetailerConfig, RetailerSource, duration};
use crate::discovery::DiscoveryEngine;
use crate::domain::{JobSource, ScrapeJob};
use crate::events::{Event, EventBus};
use crate::metrics::Metrics;
use crate::orchestrator::{EnqueueOutcome, Orchestrator};
use crate::storage::Storage;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Shut down; no further cycles start.
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Answer to a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    AlreadyRunning,
    ShuttingDown,
}

/// Health summary for the reporting layer.
#[derive(Debug, Clone)]
pub struct Health {
    pub scheduler_state: SchedulerState,
    pub queue_depth: usize,
    pub worker_utilization: f64,
    pub in_flight: usize,
    pub pending_manual_urls: usize,
    pub last_cycle: Option<CycleReport>,
}

/// Summary of one scrape cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub retailers: usize,
    pub skipped_retailers: usize,
    pub discovery_failures: usize,
    pub discovered: usize,
    pub enqueued: usize,
    pub duplicates: usize,
    pub cooling_down: usize,
    pub dropped: usize,
    pub abandoned: usize,
    pub drained: bool,
    pub duration: Duration,
}

impl CycleReport {
    fn record(&mut self, outcome: EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Queued => self.enqueued += 1,
            EnqueueOutcome::Duplicate => self.duplicates += 1,
            EnqueueOutcome::CoolingDown => self.cooling_down += 1,
            EnqueueOutcome::Dropped | EnqueueOutcome::ShuttingDown => self.dropped += 1,
        }
    }
}

/// Cycle timing.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub max_cycle_duration: Duration,
    pub refresh_known_products: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
            max_cycle_duration: Duration::from_secs(45 * 60),
            refresh_known_products: true,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let Some(scheduler) = config.scheduler.as_ref() else {
            return defaults;
        };

        Self {
            enabled: scheduler.enabled,
            interval: duration::or_default(scheduler.interval, defaults.interval),
            max_cycle_duration: duration::or_default(
                scheduler.max_cycle_duration,
                defaults.max_cycle_duration,
            ),
            refresh_known_products: scheduler
                .refresh_known_products
                .unwrap_or(defaults.refresh_known_products),
        }
    }
}

/// Collaborators the scheduler drives.
pub struct SchedulerDeps {
    pub source: Arc<dyn RetailerSource>,
    pub discovery: Arc<DiscoveryEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<dyn Storage>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub clock: Arc<dyn Clock>,
}

/// Scheduler runs scrape cycles on a timer and on demand.
pub struct Scheduler {
    deps: SchedulerDeps,
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
    stopping: AtomicBool,
    manual_urls: Mutex<Vec<(i64, String)>>,
    cycles: AtomicU64,
    last_report: Mutex<Option<CycleReport>>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, settings: SchedulerSettings) -> Self {
        Self {
            deps,
            settings,
            state: Mutex::new(SchedulerState::Idle),
            stopping: AtomicBool::new(false),
            manual_urls: Mutex::new(Vec::new()),
            cycles: AtomicU64::new(0),
            last_report: Mutex::new(None),
        }
    }

    /// Starts a cycle in the background unless one is already running.
    pub async fn trigger_cycle(self: &Arc<Self>) -> TriggerOutcome {
        match self.begin().await {
            Ok(()) => {}
            Err(SchedulerError::AlreadyRunning) => {
                info!("Manual trigger ignored, cycle already running");
                return TriggerOutcome::AlreadyRunning;
            }
            Err(_) => return TriggerOutcome::ShuttingDown,
        }

        info!("Manual scrape cycle accepted");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run_begun_cycle().await {
                error!(error = %e, "Manual scrape cycle failed");
            }
        });
        TriggerOutcome::Accepted
    }

    /// Runs one cycle to completion on the caller's task.
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        self.begin().await?;
        self.run_begun_cycle().await
    }

    /// Queues a product URL for the next cycle. Manual URLs are never dropped
    /// by backpressure.
    pub async fn submit_manual_url(
        &self,
        retailer_id: i64,
        url: &str,
    ) -> Result<(), SchedulerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let parsed = Url::parse(url.trim())
            .map_err(|e| SchedulerError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SchedulerError::InvalidUrl(format!(
                "{}: unsupported scheme",
                url
            )));
        }

        let entry = (retailer_id, parsed.to_string());
        let mut manual = self.manual_urls.lock().await;
        if !manual.contains(&entry) {
            debug!(retailer_id, url = %entry.1, "Manual URL submitted");
            manual.push(entry);
        }
        Ok(())
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.lock().await
    }

    pub async fn health(&self) -> Health {
        let pool = self.deps.orchestrator.status().await;
        Health {
            scheduler_state: self.state().await,
            queue_depth: pool.queue_depth,
            worker_utilization: pool.utilization(),
            in_flight: pool.in_flight,
            pending_manual_urls: self.manual_urls.lock().await.len(),
            last_cycle: self.last_report.lock().await.clone(),
        }
    }

    /// Runs cycles on the configured interval until `shutdown` flips to true.
    /// The first cycle starts immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.settings.enabled {
            info!("Scheduler timer disabled, manual triggers only");
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        }

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?self.settings.interval,
            max_cycle_duration = ?self.settings.max_cycle_duration,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(_) => {}
                        Err(SchedulerError::AlreadyRunning) => {
                            info!("Timer cycle skipped, manual cycle running");
                        }
                        Err(SchedulerError::ShuttingDown) => break,
                        Err(e) => error!(error = %e, "Scrape cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler loop exited");
    }

    /// Refuses new cycles and manual URLs. A running cycle finishes on its own.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if *state == SchedulerState::Idle {
            *state = SchedulerState::Stopped;
        }
        let current = *state;
        info!(state = %current, "Scheduler stopping");
    }

    async fn begin(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }
        match *state {
            SchedulerState::Running => Err(SchedulerError::AlreadyRunning),
            SchedulerState::Stopped => Err(SchedulerError::ShuttingDown),
            SchedulerState::Idle => {
                *state = SchedulerState::Running;
                Ok(())
            }
        }
    }

    async fn end(&self) {
        let mut state = self.state.lock().await;
        *state = if self.stopping.load(Ordering::SeqCst) {
            SchedulerState::Stopped
        } else {
            SchedulerState::Idle
        };
    }

    async fn run_begun_cycle(&self) -> Result<CycleReport, SchedulerError> {
        let result = self.execute_cycle().await;
        self.end().await;

        if let Ok(ref report) = result {
            *self.last_report.lock().await = Some(report.clone());
        }
        result
    }

    async fn execute_cycle(&self) -> Result<CycleReport, SchedulerError> {
        let started = Instant::now();
        let mut report = CycleReport {
            cycle: self.cycles.fetch_add(1, Ordering::SeqCst) + 1,
            ..CycleReport::default()
        };

        let retailers = self.deps.source.list_active_retailers().await?;
        let (eligible, ineligible): (Vec<RetailerConfig>, Vec<RetailerConfig>) =
            retailers.into_iter().partition(RetailerConfig::is_eligible);

        for retailer in &ineligible {
            warn!(
                retailer_id = retailer.id,
                name = %retailer.name,
                "Retailer skipped, extraction selectors incomplete"
            );
        }
        report.retailers = eligible.len();
        report.skipped_retailers = ineligible.len();

        info!(
            cycle = report.cycle,
            retailers = report.retailers,
            skipped = report.skipped_retailers,
            "Scrape cycle started"
        );

        self.deps.orchestrator.register_retailers(&eligible).await;

        let mut manual = std::mem::take(&mut *self.manual_urls.lock().await);
        manual.extend(eligible.iter().flat_map(|retailer| {
            retailer
                .product_urls
                .iter()
                .map(move |url| (retailer.id, url.trim().to_string()))
        }));
        for (retailer_id, url) in manual {
            let job = ScrapeJob::new(retailer_id, url, JobSource::Manual, self.deps.clock.now());
            report.record(self.deps.orchestrator.enqueue(job).await);
        }

        let discoveries = join_all(eligible.iter().map(|retailer| async move {
            (retailer, self.deps.discovery.discover(retailer).await)
        }))
        .await;

        for (retailer, result) in discoveries {
            match result {
                Ok(urls) => {
                    report.discovered += urls.len();
                    self.deps.metrics.products_discovered(urls.len());
                    for url in urls {
                        self.deps
                            .bus
                            .publish(Event::product_discovered(retailer.id, url.clone()))
                            .await;
                        let job =
                            ScrapeJob::new(retailer.id, url, JobSource::Discovery, self.deps.clock.now());
                        report.record(self.deps.orchestrator.enqueue(job).await);
                    }
                }
                Err(e) => {
                    report.discovery_failures += 1;
                    warn!(retailer_id = retailer.id, error = %e, "Discovery failed");
                }
            }

            if self.settings.refresh_known_products {
                self.enqueue_known(retailer, &mut report).await;
            }
        }

        if report.dropped > 0 {
            warn!(
                cycle = report.cycle,
                dropped = report.dropped,
                "Queue over depth limit, jobs dropped for this cycle"
            );
        }

        let remaining = self
            .settings
            .max_cycle_duration
            .saturating_sub(started.elapsed());
        report.drained = self.deps.orchestrator.wait_drained(remaining).await;
        if !report.drained {
            report.abandoned = self
                .deps
                .orchestrator
                .abandon_queued("cycle ceiling reached")
                .await;
            warn!(
                cycle = report.cycle,
                abandoned = report.abandoned,
                ceiling = ?self.settings.max_cycle_duration,
                "Cycle ceiling reached before queue drained"
            );
        }

        report.duration = started.elapsed();
        info!(
            cycle = report.cycle,
            discovered = report.discovered,
            enqueued = report.enqueued,
            cooling_down = report.cooling_down,
            dropped = report.dropped,
            abandoned = report.abandoned,
            discovery_failures = report.discovery_failures,
            duration = ?report.duration,
            "Scrape cycle finished"
        );
        Ok(report)
    }

    async fn enqueue_known(&self, retailer: &RetailerConfig, report: &mut CycleReport) {
        let urls = match self.deps.storage.list_product_urls(retailer.id).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(retailer_id = retailer.id, error = %e, "Failed to load known products");
                return;
            }
        };

        for url in urls {
            let job = ScrapeJob::new(retailer.id, url, JobSource::Refresh, self.deps.clock.now());
            report.record(self.deps.orchestrator.enqueue(job).await);
        }
    }
}
