//! Opportunity detector configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Cross-retailer price gap detection settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectorConfig {
    /// Minimum gap in percent for an opportunity to be active (e.g. "5" for 5%).
    pub threshold: Option<String>,
    /// Maximum age of a price still used for comparison (default: 24h).
    #[serde(default, with = "duration")]
    pub freshness_window: Duration,
    /// Interval of the full sweep over all correlated products (default: 6h).
    #[serde(default, with = "duration")]
    pub sweep_interval: Duration,
    /// Percentage points an active opportunity may fall below the threshold
    /// before it is deactivated (default: "0").
    pub hysteresis: Option<String>,
    /// Price movement in percent logged as significant (default: "10").
    pub significant_change: Option<String>,
}
