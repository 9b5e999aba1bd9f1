//! Application-level configuration.

use serde::Deserialize;

/// Service identity and log verbosity.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Service name, logged at startup.
    pub name: String,
    /// Deployment environment (default: "development").
    #[serde(default = "default_env")]
    pub env: String,
    /// "trace", "debug", "info", "warn" or "error"; `RUST_LOG` takes precedence.
    pub log_level: Option<String>,
}

fn default_env() -> String {
    "development".to_string()
}
