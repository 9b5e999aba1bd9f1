//! Scraped product model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection of a record that must never be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("price text '{0}' contains no number")]
    UnparseablePrice(String),
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),
    #[error("product name is empty")]
    EmptyName,
}

/// Latest known state of one product at one retailer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Storage id; `None` until the record has been persisted.
    pub id: Option<i64>,
    pub retailer_id: i64,
    /// Cross-retailer correlation key (UPC, EAN, ASIN...).
    pub product_identifier: Option<String>,
    pub name: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub product_url: String,
    pub last_scraped_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Checks the invariants every stored record satisfies.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.price <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice(self.price));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(())
    }
}
