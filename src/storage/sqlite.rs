//! SQLite implementation of Storage.

use crate::domain::{ArbitrageOpportunity, PriceHistoryEntry, ProductRecord};
use crate::storage::{Storage, StorageError, check_history_entry, check_opportunity};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

/// SqliteStorage implements Storage using SQLite.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

/// SqliteStorageConfig holds SQLite storage configuration.
#[derive(Debug, Clone)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: "pricewatch.db".to_string(),
            max_connections: 5,
        }
    }
}

impl SqliteStorage {
    /// Creates a new SQLite storage instance.
    pub async fn new(config: SqliteStorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let storage = Self { pool };

        storage.migrate().await?;

        info!(path = %config.path, "SQLite storage initialized");
        Ok(storage)
    }

    /// Creates the schema if it does not exist yet.
    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retailer_id INTEGER NOT NULL,
                product_identifier TEXT,
                name TEXT NOT NULL,
                price TEXT NOT NULL,
                image_url TEXT,
                product_url TEXT NOT NULL,
                last_scraped_at TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (retailer_id, product_url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_products_identifier ON products(product_identifier)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products(id),
                retailer_id INTEGER NOT NULL,
                price TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id, recorded_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                correlation_key TEXT PRIMARY KEY,
                buy_retailer_id INTEGER NOT NULL,
                buy_price TEXT NOT NULL,
                reference_retailer_id INTEGER NOT NULL,
                reference_price TEXT NOT NULL,
                diff_percentage TEXT NOT NULL,
                active INTEGER NOT NULL,
                detected_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_opportunities_active ON opportunities(active, last_updated)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const PRODUCT_COLUMNS: &str = "id, retailer_id, product_identifier, name, price, image_url, product_url, last_scraped_at";

const OPPORTUNITY_COLUMNS: &str = "correlation_key, buy_retailer_id, buy_price, reference_retailer_id, reference_price, diff_percentage, active, detected_at, last_updated";

#[async_trait]
impl Storage for SqliteStorage {
    async fn find_product(
        &self,
        retailer_id: i64,
        product_url: &str,
    ) -> Result<Option<ProductRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE retailer_id = ? AND product_url = ?",
            PRODUCT_COLUMNS
        ))
        .bind(retailer_id)
        .bind(product_url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_product_row).transpose()
    }

    async fn save_product(&self, product: &ProductRecord) -> Result<ProductRecord, StorageError> {
        product.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO products (
                retailer_id, product_identifier, name, price, image_url, product_url, last_scraped_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(retailer_id, product_url) DO UPDATE SET
                product_identifier = excluded.product_identifier,
                name = excluded.name,
                price = excluded.price,
                image_url = excluded.image_url,
                last_scraped_at = excluded.last_scraped_at
            RETURNING id
            "#,
        )
        .bind(product.retailer_id)
        .bind(&product.product_identifier)
        .bind(&product.name)
        .bind(product.price.to_string())
        .bind(&product.image_url)
        .bind(&product.product_url)
        .bind(format_time(&product.last_scraped_at))
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        debug!(id, retailer_id = product.retailer_id, url = %product.product_url, "Product saved");

        let mut stored = product.clone();
        stored.id = Some(id);
        Ok(stored)
    }

    async fn list_product_urls(&self, retailer_id: i64) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT product_url FROM products WHERE retailer_id = ?")
            .bind(retailer_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("product_url").map_err(StorageError::from))
            .collect()
    }

    async fn list_products_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Vec<ProductRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products WHERE product_identifier = ? ORDER BY retailer_id, id",
            PRODUCT_COLUMNS
        ))
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_product_row).collect()
    }

    async fn list_identifiers(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            "SELECT DISTINCT product_identifier FROM products WHERE product_identifier IS NOT NULL ORDER BY product_identifier",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("product_identifier").map_err(StorageError::from))
            .collect()
    }

    async fn append_price_history(&self, entry: &PriceHistoryEntry) -> Result<(), StorageError> {
        check_history_entry(entry)?;

        sqlx::query(
            "INSERT INTO price_history (product_id, retailer_id, price, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(entry.product_id)
        .bind(entry.retailer_id)
        .bind(entry.price.to_string())
        .bind(format_time(&entry.recorded_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn price_history(&self, product_id: i64) -> Result<Vec<PriceHistoryEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, retailer_id, price, recorded_at
            FROM price_history WHERE product_id = ? ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PriceHistoryEntry {
                    product_id: row.try_get("product_id")?,
                    retailer_id: row.try_get("retailer_id")?,
                    price: parse_decimal(row, "price")?,
                    recorded_at: parse_time(row, "recorded_at")?,
                })
            })
            .collect()
    }

    async fn get_opportunity(
        &self,
        correlation_key: &str,
    ) -> Result<Option<ArbitrageOpportunity>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE correlation_key = ?",
            OPPORTUNITY_COLUMNS
        ))
        .bind(correlation_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_opportunity_row).transpose()
    }

    async fn upsert_opportunity(&self, opp: &ArbitrageOpportunity) -> Result<(), StorageError> {
        check_opportunity(opp)?;

        sqlx::query(
            r#"
            INSERT INTO opportunities (
                correlation_key, buy_retailer_id, buy_price, reference_retailer_id,
                reference_price, diff_percentage, active, detected_at, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(correlation_key) DO UPDATE SET
                buy_retailer_id = excluded.buy_retailer_id,
                buy_price = excluded.buy_price,
                reference_retailer_id = excluded.reference_retailer_id,
                reference_price = excluded.reference_price,
                diff_percentage = excluded.diff_percentage,
                active = excluded.active,
                detected_at = excluded.detected_at,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&opp.correlation_key)
        .bind(opp.buy_retailer_id)
        .bind(opp.buy_price.to_string())
        .bind(opp.reference_retailer_id)
        .bind(opp.reference_price.to_string())
        .bind(opp.diff_percentage.to_string())
        .bind(opp.active as i64)
        .bind(format_time(&opp.detected_at))
        .bind(format_time(&opp.last_updated))
        .execute(&self.pool)
        .await?;

        debug!(
            key = %opp.correlation_key,
            active = opp.active,
            diff = %opp.diff_percentage,
            "Opportunity upserted"
        );
        Ok(())
    }

    async fn list_opportunities(
        &self,
        active_only: bool,
    ) -> Result<Vec<ArbitrageOpportunity>, StorageError> {
        let filter = if active_only { "WHERE active = 1" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities {} ORDER BY last_updated DESC",
            OPPORTUNITY_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_opportunity_row).collect()
    }

    async fn count_active_opportunities(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM opportunities WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, StorageError> {
    let value: String = row.try_get(column)?;
    Decimal::from_str(&value)
        .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
}

fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StorageError> {
    let value: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
}

/// Parses a product from a database row.
fn parse_product_row(row: &SqliteRow) -> Result<ProductRecord, StorageError> {
    Ok(ProductRecord {
        id: Some(row.try_get("id")?),
        retailer_id: row.try_get("retailer_id")?,
        product_identifier: row.try_get("product_identifier")?,
        name: row.try_get("name")?,
        price: parse_decimal(row, "price")?,
        image_url: row.try_get("image_url")?,
        product_url: row.try_get("product_url")?,
        last_scraped_at: parse_time(row, "last_scraped_at")?,
    })
}

/// Parses an opportunity from a database row.
fn parse_opportunity_row(row: &SqliteRow) -> Result<ArbitrageOpportunity, StorageError> {
    let active: i64 = row.try_get("active")?;

    Ok(ArbitrageOpportunity {
        correlation_key: row.try_get("correlation_key")?,
        buy_retailer_id: row.try_get("buy_retailer_id")?,
        buy_price: parse_decimal(row, "buy_price")?,
        reference_retailer_id: row.try_get("reference_retailer_id")?,
        reference_price: parse_decimal(row, "reference_price")?,
        diff_percentage: parse_decimal(row, "diff_percentage")?,
        active: active != 0,
        detected_at: parse_time(row, "detected_at")?,
        last_updated: parse_time(row, "last_updated")?,
    })
}
