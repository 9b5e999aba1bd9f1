//! Configuration loading and validation for the price watcher.
//!
//! Uses serde_yaml to load YAML configuration files. Selectors and URLs are
//! validated at load time so a broken retailer entry is reported on startup
//! rather than on its first scrape.

mod app;
mod detector;
mod discovery;
pub(crate) mod duration;
mod error;
mod events;
mod retailer;
mod scheduler;
mod scraper;
mod source;
mod storage;

pub use app::AppConfig;
pub use detector::DetectorConfig;
pub use discovery::DiscoveryConfig;
pub use error::ConfigError;
pub use events::EventsConfig;
pub use retailer::RetailerConfig;
pub use scheduler::SchedulerConfig;
pub use scraper::{RetryConfig, ScraperConfig};
pub use source::{FileRetailerSource, RetailerSource, StaticRetailerSource};
pub use storage::StorageConfig;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::{env, fs};

/// Root configuration structure.
///
/// Required sections: app.
/// Optional sections: retailers, scraper, discovery, scheduler, events, detector, storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application-level settings like name and environment.
    pub app: AppConfig,
    /// Price sources to scrape.
    #[serde(default)]
    pub retailers: Vec<RetailerConfig>,
    /// Worker pool and retry settings (optional).
    pub scraper: Option<ScraperConfig>,
    /// Discovery page scanning (optional).
    pub discovery: Option<DiscoveryConfig>,
    /// Cycle timing (optional).
    pub scheduler: Option<SchedulerConfig>,
    /// Event dispatch (optional).
    pub events: Option<EventsConfig>,
    /// Opportunity detection (optional).
    pub detector: Option<DetectorConfig>,
    /// Persistence (optional).
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// First loads environment variables from `.env` file (if exists), then
    /// applies overrides:
    /// - `PRICEWATCH_STORAGE_PATH` replaces `storage.path` and enables storage
    /// - `PRICEWATCH_LOG_LEVEL` replaces `app.log_level`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses and validates configuration from a YAML string without env overrides.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var("PRICEWATCH_STORAGE_PATH") {
            if !path.is_empty() {
                let max_connections = self.storage.as_ref().and_then(|s| s.max_connections);
                self.storage = Some(StorageConfig {
                    enabled: true,
                    path: Some(path),
                    max_connections,
                });
            }
        }

        if let Ok(level) = env::var("PRICEWATCH_LOG_LEVEL") {
            if !level.is_empty() {
                self.app.log_level = Some(level);
            }
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        let mut ids = HashSet::new();
        for retailer in &self.retailers {
            if !ids.insert(retailer.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate retailer id {}",
                    retailer.id
                )));
            }
            retailer.validate()?;
        }

        if let Some(ref scraper) = self.scraper {
            if scraper.workers == Some(0) {
                return Err(ConfigError::Validation(
                    "scraper.workers must be positive".into(),
                ));
            }
            if scraper.max_queue_depth == Some(0) {
                return Err(ConfigError::Validation(
                    "scraper.max_queue_depth must be positive".into(),
                ));
            }
            if let Some(ref retry) = scraper.retry {
                if retry.max_attempts == Some(0) {
                    return Err(ConfigError::Validation(
                        "scraper.retry.max_attempts must be positive".into(),
                    ));
                }
                if let Some(multiplier) = retry.multiplier {
                    if multiplier < 1.0 {
                        return Err(ConfigError::Validation(
                            "scraper.retry.multiplier must be at least 1.0".into(),
                        ));
                    }
                }
            }
        }

        if let Some(ref discovery) = self.discovery {
            if discovery.max_new_per_cycle == Some(0) {
                return Err(ConfigError::Validation(
                    "discovery.max_new_per_cycle must be positive".into(),
                ));
            }
        }

        if let Some(ref detector) = self.detector {
            if let Some(ref threshold) = detector.threshold {
                let value = parse_percent("detector.threshold", threshold)?;
                if value <= Decimal::ZERO || value > Decimal::from(1000) {
                    return Err(ConfigError::Validation(
                        "detector.threshold must be in (0, 1000]".into(),
                    ));
                }
            }
            if let Some(ref hysteresis) = detector.hysteresis {
                if parse_percent("detector.hysteresis", hysteresis)? < Decimal::ZERO {
                    return Err(ConfigError::Validation(
                        "detector.hysteresis must not be negative".into(),
                    ));
                }
            }
            if let Some(ref significant) = detector.significant_change {
                if parse_percent("detector.significant_change", significant)? <= Decimal::ZERO {
                    return Err(ConfigError::Validation(
                        "detector.significant_change must be positive".into(),
                    ));
                }
            }
        }

        if let Some(ref storage) = self.storage {
            if storage.enabled && storage.path.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Validation(
                    "storage.path is required when storage is enabled".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Parses a percentage written as a decimal string, e.g. "5" or "2.5".
pub(crate) fn parse_percent(field: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim())
        .map_err(|e| ConfigError::Validation(format!("{} '{}' is not a number: {}", field, value, e)))
}
