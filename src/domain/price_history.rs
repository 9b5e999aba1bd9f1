//! Append-only price observations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One observed price. Entries are never modified after they are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub product_id: i64,
    pub retailer_id: i64,
    pub price: Decimal,
    pub recorded_at: DateTime<Utc>,
}
