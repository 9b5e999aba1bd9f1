//! Storage configuration.

use serde::Deserialize;

/// Product, price history and opportunity persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Persist to SQLite; otherwise records live in memory for the process lifetime.
    #[serde(default)]
    pub enabled: bool,
    /// Path to the SQLite database file.
    pub path: Option<String>,
    /// Connection pool size.
    pub max_connections: Option<u32>,
}
