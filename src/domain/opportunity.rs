//! Arbitrage opportunity domain model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lowest diff percentage a stored opportunity may carry.
pub const MIN_DIFF_PERCENTAGE: Decimal = Decimal::from_parts(100, 0, 0, true, 0);

/// Highest diff percentage a stored opportunity may carry.
pub const MAX_DIFF_PERCENTAGE: Decimal = Decimal::ONE_THOUSAND;

/// Price gap between the cheapest and the most expensive retailer of one
/// correlated product. Keyed by `correlation_key`; deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    /// The shared `product_identifier` of the compared products.
    pub correlation_key: String,
    /// Retailer with the lowest fresh price.
    pub buy_retailer_id: i64,
    pub buy_price: Decimal,
    /// Retailer with the highest fresh price.
    pub reference_retailer_id: i64,
    pub reference_price: Decimal,
    /// `(reference - buy) / buy * 100`, clamped to [-100, 1000].
    pub diff_percentage: Decimal,
    pub active: bool,
    /// When the opportunity last became active.
    pub detected_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    /// Computes the percentage gap between two prices, clamped to the stored range.
    ///
    /// Returns `None` when `buy_price` is not positive.
    pub fn diff_percentage(buy_price: Decimal, reference_price: Decimal) -> Option<Decimal> {
        if buy_price <= Decimal::ZERO {
            return None;
        }
        let diff = (reference_price - buy_price)
            .checked_div(buy_price)?
            .checked_mul(Decimal::ONE_HUNDRED)
            .unwrap_or(MAX_DIFF_PERCENTAGE);
        Some(diff.clamp(MIN_DIFF_PERCENTAGE, MAX_DIFF_PERCENTAGE).round_dp(4))
    }

    /// Absolute spread between the two prices.
    pub fn spread(&self) -> Decimal {
        self.reference_price - self.buy_price
    }
}
