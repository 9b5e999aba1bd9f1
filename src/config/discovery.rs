//! Product discovery configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Discovery page scanning settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum number of new URLs taken from one retailer per cycle (default: 50).
    pub max_new_per_cycle: Option<usize>,
    /// How long an extracted link list is reused (default: 10m).
    #[serde(default, with = "duration")]
    pub cache_ttl: Duration,
}
