//! Retailer configuration readers used by the scheduler.

use async_trait::async_trait;
use tracing::debug;

use super::{Config, ConfigError, RetailerConfig};

/// Read-only access to externally managed retailer configuration.
#[async_trait]
pub trait RetailerSource: Send + Sync {
    /// Returns every retailer flagged active, eligible or not.
    async fn list_active_retailers(&self) -> Result<Vec<RetailerConfig>, ConfigError>;
}

/// Re-reads the YAML file on every call so edits apply on the next cycle.
pub struct FileRetailerSource {
    path: String,
}

impl FileRetailerSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RetailerSource for FileRetailerSource {
    async fn list_active_retailers(&self) -> Result<Vec<RetailerConfig>, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let config = Config::from_yaml(&content)?;
        let retailers: Vec<RetailerConfig> =
            config.retailers.into_iter().filter(|r| r.active).collect();
        debug!(path = %self.path, count = retailers.len(), "Loaded retailers");
        Ok(retailers)
    }
}

/// Fixed retailer list.
pub struct StaticRetailerSource {
    retailers: Vec<RetailerConfig>,
}

impl StaticRetailerSource {
    pub fn new(retailers: Vec<RetailerConfig>) -> Self {
        Self { retailers }
    }
}

#[async_trait]
impl RetailerSource for StaticRetailerSource {
    async fn list_active_retailers(&self) -> Result<Vec<RetailerConfig>, ConfigError> {
        Ok(self.retailers.iter().filter(|r| r.active).cloned().collect())
    }
}
