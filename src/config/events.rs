//! Event bus configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Event dispatch settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsConfig {
    /// Longest a single handler may run before it is skipped (default: 5s).
    #[serde(default, with = "duration")]
    pub handler_timeout: Duration,
}
