mod cache;
mod clock;
mod config;
mod detector;
mod discovery;
mod domain;
mod events;
mod extract;
mod fetch;
mod metrics;
mod orchestrator;
mod scheduler;
mod storage;

#[cfg(test)]
mod testing;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cache::TtlCache;
use clock::{Clock, SystemClock};
use config::{Config, FileRetailerSource, duration, parse_percent};
use detector::{DetectorSettings, OpportunityDetector};
use discovery::{DiscoveryEngine, DiscoverySettings};
use events::{
    DEFAULT_HANDLER_TIMEOUT, DiscoveryCacheInvalidator, EventBus, EventType, PriceMovementLogger,
    PriceRecorder,
};
use fetch::{HttpFetcher, HttpFetcherConfig};
use metrics::Metrics;
use orchestrator::{Orchestrator, OrchestratorSettings};
use scheduler::{Scheduler, SchedulerDeps, SchedulerSettings};
use storage::{MemoryStorage, SqliteStorage, SqliteStorageConfig, Storage};

const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// How often the metrics snapshot is written to the log.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

fn parse_config_path() -> String {
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn init_tracing(log_level: Option<&str>) {
    let level = match log_level {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | Some("warning") => Level::WARN,
        Some("error") => Level::ERROR,
        Some("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn open_storage(config: &Config) -> Result<Arc<dyn Storage>, storage::StorageError> {
    match config.storage.as_ref() {
        Some(storage) if storage.enabled => {
            let defaults = SqliteStorageConfig::default();
            let sqlite = SqliteStorage::new(SqliteStorageConfig {
                path: storage.path.clone().unwrap_or(defaults.path),
                max_connections: storage.max_connections.unwrap_or(defaults.max_connections),
            })
            .await?;
            Ok(Arc::new(sqlite))
        }
        _ => {
            info!("Storage disabled, keeping records in memory");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs an extra scrape cycle on every SIGHUP.
#[cfg(unix)]
async fn trigger_on_hangup(scheduler: Arc<Scheduler>, mut shutdown: watch::Receiver<bool>) {
    let mut hangup =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGHUP, manual triggers disabled");
                return;
            }
        };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                let outcome = scheduler.trigger_cycle().await;
                info!(outcome = ?outcome, "SIGHUP received");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn log_metrics(
    metrics: Arc<Metrics>,
    bus: Arc<EventBus>,
    cooldown: Arc<TtlCache<chrono::DateTime<chrono::Utc>>>,
    links: Arc<TtlCache<discovery::DiscoveredLinks>>,
    scheduler: Arc<Scheduler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(METRICS_LOG_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Entries are otherwise only evicted when read.
                cooldown.purge_expired();
                links.purge_expired();

                let snapshot = metrics.snapshot();
                let health = scheduler.health().await;
                let bus_stats = bus.stats();
                let cooldown_stats = cooldown.stats();
                let links_stats = links.stats();
                info!(
                    metrics = %serde_json::to_string(&snapshot).unwrap_or_default(),
                    scheduler_state = %health.scheduler_state,
                    queue_depth = health.queue_depth,
                    worker_utilization = health.worker_utilization,
                    events_delivered = bus_stats.delivered,
                    handler_errors = bus_stats.handler_errors,
                    handler_timeouts = bus_stats.handler_timeouts,
                    cooldown_entries = cooldown_stats.entries,
                    discovery_cache_hits = links_stats.hits,
                    discovery_cache_misses = links_stats.misses,
                    "Metrics"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return;
        }
    };

    init_tracing(config.app.log_level.as_deref());

    let detector_settings = match DetectorSettings::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Invalid detector settings");
            return;
        }
    };
    let significant_change = match config
        .detector
        .as_ref()
        .and_then(|d| d.significant_change.as_deref())
    {
        Some(value) => match parse_percent("detector.significant_change", value) {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Invalid detector settings");
                return;
            }
        },
        None => Decimal::from(10),
    };

    let storage = match open_storage(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to open storage");
            return;
        }
    };

    let orchestrator_settings = OrchestratorSettings::from_config(&config);
    let scraper = config.scraper.clone().unwrap_or_default();
    let mut fetcher_config = HttpFetcherConfig {
        timeout: orchestrator_settings.job_timeout,
        ..HttpFetcherConfig::default()
    };
    if let Some(agent) = scraper.user_agent {
        fetcher_config.user_agent = agent;
    }
    let fetcher = match HttpFetcher::new(fetcher_config) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            return;
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let cooldown = Arc::new(TtlCache::new("cooldown", clock.clone()));
    let links = Arc::new(TtlCache::new("discovery", clock.clone()));

    let handler_timeout = duration::or_default(
        config
            .events
            .as_ref()
            .map(|e| e.handler_timeout)
            .unwrap_or_default(),
        DEFAULT_HANDLER_TIMEOUT,
    );
    let bus = Arc::new(EventBus::new(handler_timeout));

    let detector = Arc::new(OpportunityDetector::new(
        storage.clone(),
        clock.clone(),
        metrics.clone(),
        detector_settings,
    ));

    bus.subscribe(
        EventType::ProductScraped,
        Arc::new(PriceRecorder::new(storage.clone())),
    )
    .await;
    bus.subscribe(
        EventType::ScrapingFailed,
        Arc::new(DiscoveryCacheInvalidator::new(links.clone())),
    )
    .await;
    bus.subscribe(
        EventType::PriceChanged,
        Arc::new(PriceMovementLogger::new(significant_change)),
    )
    .await;
    bus.subscribe(EventType::PriceChanged, detector.clone()).await;

    let discovery = Arc::new(DiscoveryEngine::new(
        fetcher.clone(),
        storage.clone(),
        links.clone(),
        DiscoverySettings::from_config(&config),
    ));

    let shutdown_grace = orchestrator_settings.shutdown_grace;
    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        bus.clone(),
        clock.clone(),
        metrics.clone(),
        cooldown.clone(),
        orchestrator_settings,
    ));
    orchestrator.start().await;

    let scheduler = Arc::new(Scheduler::new(
        SchedulerDeps {
            source: Arc::new(FileRetailerSource::new(config_path.clone())),
            discovery,
            orchestrator: orchestrator.clone(),
            storage: storage.clone(),
            bus: bus.clone(),
            metrics: metrics.clone(),
            clock,
        },
        SchedulerSettings::from_config(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    #[cfg(unix)]
    tokio::spawn(trigger_on_hangup(scheduler.clone(), shutdown_rx.clone()));
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx.clone()));
    let detector_task = tokio::spawn(detector.run_periodic(shutdown_rx.clone()));
    let metrics_task = tokio::spawn(log_metrics(
        metrics.clone(),
        bus,
        cooldown,
        links,
        scheduler.clone(),
        shutdown_rx,
    ));

    info!(
        name = %config.app.name,
        env = %config.app.env,
        config = %config_path,
        "Pricewatch started"
    );

    shutdown_signal().await;
    info!("Shutdown requested");

    scheduler.stop().await;
    let report = orchestrator.shutdown(shutdown_grace).await;
    if report.abandoned > 0 || report.interrupted > 0 {
        warn!(
            abandoned = report.abandoned,
            interrupted = report.interrupted,
            "Jobs cut short by shutdown"
        );
    }

    let _ = shutdown_tx.send(true);
    for task in [scheduler_task, detector_task, metrics_task] {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }

    if let Err(e) = storage.close().await {
        error!(error = %e, "Failed to close storage");
    }

    info!(metrics = ?metrics.snapshot(), "Pricewatch stopped");
}
