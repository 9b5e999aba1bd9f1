//! In-process implementation of Storage, used when persistence is disabled and in tests.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{ArbitrageOpportunity, PriceHistoryEntry, ProductRecord};
use crate::storage::{Storage, StorageError, check_history_entry, check_opportunity};

#[derive(Default)]
struct State {
    next_product_id: i64,
    products: BTreeMap<i64, ProductRecord>,
    history: Vec<PriceHistoryEntry>,
    opportunities: BTreeMap<String, ArbitrageOpportunity>,
}

/// MemoryStorage keeps every record in process memory.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_product(
        &self,
        retailer_id: i64,
        product_url: &str,
    ) -> Result<Option<ProductRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .find(|p| p.retailer_id == retailer_id && p.product_url == product_url)
            .cloned())
    }

    async fn save_product(&self, product: &ProductRecord) -> Result<ProductRecord, StorageError> {
        product.validate()?;

        let mut state = self.state.write().await;
        let existing_id = state
            .products
            .values()
            .find(|p| p.retailer_id == product.retailer_id && p.product_url == product.product_url)
            .and_then(|p| p.id);

        let id = match existing_id {
            Some(id) => id,
            None => {
                state.next_product_id += 1;
                state.next_product_id
            }
        };

        let mut stored = product.clone();
        stored.id = Some(id);
        state.products.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_product_urls(&self, retailer_id: i64) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| p.retailer_id == retailer_id)
            .map(|p| p.product_url.clone())
            .collect())
    }

    async fn list_products_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Vec<ProductRecord>, StorageError> {
        let state = self.state.read().await;
        let mut products: Vec<ProductRecord> = state
            .products
            .values()
            .filter(|p| p.product_identifier.as_deref() == Some(identifier))
            .cloned()
            .collect();
        products.sort_by_key(|p| (p.retailer_id, p.id));
        Ok(products)
    }

    async fn list_identifiers(&self) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        let identifiers: BTreeSet<String> = state
            .products
            .values()
            .filter_map(|p| p.product_identifier.clone())
            .collect();
        Ok(identifiers.into_iter().collect())
    }

    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<(), StorageError> {
        check_history_entry(entry)?;
        let mut state = self.state.write().await;
        state.history.push(entry.clone());
        Ok(())
    }

    async fn price_history(&self, product_id: i64) -> Result<Vec<PriceHistoryEntry>, StorageError> {
        let state = self.state.read().await;
        let mut entries: Vec<PriceHistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.product_id == product_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.recorded_at);
        Ok(entries)
    }

    async fn get_opportunity(
        &self,
        correlation_key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, StorageError> {
        let state = self.state.read().await;
        Ok(state.opportunities.get(correlation_key).cloned())
    }

    async fn upsert_opportunity(&self, opp: &ArbitrageOpportunity) -> Result<(), StorageError> {
        check_opportunity(opp)?;
        let mut state = self.state.write().await;
        state
            .opportunities
            .insert(opp.correlation_key.clone(), opp.clone());
        Ok(())
    }

    async fn list_opportunities(
        &self,
        active_only: bool,
    ) -> Result<Vec<ArbitrageOpportunity>, StorageError> {
        let state = self.state.read().await;
        let mut opps: Vec<ArbitrageOpportunity> = state
            .opportunities
            .values()
            .filter(|o| !active_only || o.active)
            .cloned()
            .collect();
        opps.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(opps)
    }

    async fn count_active_opportunities(&self) -> Result<i64, StorageError> {
        let state = self.state.read().await;
        Ok(state.opportunities.values().filter(|o| o.active).count() as i64)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
