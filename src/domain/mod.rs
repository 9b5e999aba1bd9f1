//! Domain models for price tracking and arbitrage detection.

mod job;
mod opportunity;
mod price_history;
mod product;

pub use job::{JobKey, JobSource, ScrapeJob};
pub use opportunity::{ArbitrageOpportunity, MAX_DIFF_PERCENTAGE, MIN_DIFF_PERCENTAGE};
pub use price_history::PriceHistoryEntry;
pub use product::{ProductRecord, ValidationError};
