//! Storage interfaces and implementations for products, price history and opportunities.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::{SqliteStorage, SqliteStorageConfig};

use crate::domain::{ArbitrageOpportunity, PriceHistoryEntry, ProductRecord, ValidationError};
use async_trait::async_trait;

/// Storage defines the persistence operations the scraping core relies on.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Finds the product scraped from `product_url` at the given retailer.
    async fn find_product(
        &self,
        retailer_id: i64,
        product_url: &str,
    ) -> Result<Option<ProductRecord>, StorageError>;

    /// Inserts or updates a product keyed by (retailer_id, product_url).
    /// Returns the stored record with its id set.
    async fn save_product(&self, product: &ProductRecord) -> Result<ProductRecord, StorageError>;

    /// Returns every product URL known for a retailer.
    async fn list_product_urls(&self, retailer_id: i64) -> Result<Vec<String>, StorageError>;

    /// Returns all products sharing a correlation key, ordered by retailer id.
    async fn list_products_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Vec<ProductRecord>, StorageError>;

    /// Returns every distinct non-null correlation key.
    async fn list_identifiers(&self) -> Result<Vec<String>, StorageError>;

    /// Appends an immutable price observation.
    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<(), StorageError>;

    /// Returns a product's price history ordered by `recorded_at` ascending.
    async fn price_history(&self, product_id: i64) -> Result<Vec<PriceHistoryEntry>, StorageError>;

    /// Retrieves an opportunity by its correlation key.
    async fn get_opportunity(
        &self,
        correlation_key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, StorageError>;

    /// Inserts or replaces an opportunity keyed by its correlation key.
    async fn upsert_opportunity(&self, opp: &ArbitrageOpportunity) -> Result<(), StorageError>;

    /// Lists opportunities, most recently updated first.
    async fn list_opportunities(
        &self,
        active_only: bool,
    ) -> Result<Vec<ArbitrageOpportunity>, StorageError>;

    /// Count of opportunities currently flagged active.
    async fn count_active_opportunities(&self) -> Result<i64, StorageError>;

    /// Close closes the storage connection.
    async fn close(&self) -> Result<(), StorageError>;
}

/// StorageError represents errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Rejected record: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Checks an opportunity before it is written.
pub(crate) fn check_opportunity(opp: &ArbitrageOpportunity) -> Result<(), StorageError> {
    use crate::domain::{MAX_DIFF_PERCENTAGE, MIN_DIFF_PERCENTAGE};

    if opp.diff_percentage < MIN_DIFF_PERCENTAGE || opp.diff_percentage > MAX_DIFF_PERCENTAGE {
        return Err(StorageError::InvalidData(format!(
            "diff_percentage {} out of range for {}",
            opp.diff_percentage, opp.correlation_key
        )));
    }
    if opp.correlation_key.trim().is_empty() {
        return Err(StorageError::InvalidData("empty correlation key".into()));
    }
    Ok(())
}

/// Checks a price history entry before it is written.
pub(crate) fn check_history_entry(entry: &PriceHistoryEntry) -> Result<(), StorageError> {
    if entry.price <= rust_decimal::Decimal::ZERO {
        return Err(ValidationError::NonPositivePrice(entry.price).into());
    }
    Ok(())
}
