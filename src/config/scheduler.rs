//! Scheduler configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Scrape cycle timing.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Run cycles on a timer; manual triggers work either way.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Time between cycles (default: 60m).
    #[serde(default, with = "duration")]
    pub interval: Duration,
    /// Hard ceiling on one cycle (default: 45m).
    #[serde(default, with = "duration")]
    pub max_cycle_duration: Duration,
    /// Re-scrape already known product URLs every cycle (default: true).
    pub refresh_known_products: Option<bool>,
}

fn default_enabled() -> bool {
    true
}
