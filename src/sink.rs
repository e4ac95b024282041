//! Persistence of scraped results.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;

use crate::product::ScrapedProduct;

/// Destination for successfully scraped products. The engine only knows this
/// trait; tests plug in an in-memory recorder.
#[async_trait]
pub trait ProductSink: Send + Sync {
    async fn persist(&self, product_id: &str, product: &ScrapedProduct) -> Result<()>;
}

/// Appends every scrape to a price history table, one row per observation.
pub struct PriceHistorySink {
    pool: SqlitePool,
}

impl PriceHistorySink {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid history database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open history database")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id TEXT NOT NULL,
                title TEXT NOT NULL,
                price REAL NOT NULL,
                currency TEXT NOT NULL,
                availability TEXT NOT NULL,
                seller_type TEXT NOT NULL,
                seller_name TEXT,
                rating REAL,
                review_count INTEGER,
                scraped_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_product
             ON price_history (product_id, scraped_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ProductSink for PriceHistorySink {
    async fn persist(&self, product_id: &str, product: &ScrapedProduct) -> Result<()> {
        sqlx::query(
            "INSERT INTO price_history
             (product_id, title, price, currency, availability, seller_type,
              seller_name, rating, review_count, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(product_id)
        .bind(&product.title)
        .bind(product.price)
        .bind(&product.currency)
        .bind(product.availability.as_str())
        .bind(product.seller_type.as_str())
        .bind(&product.seller_name)
        .bind(product.rating)
        .bind(product.review_count)
        .bind(product.scraped_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        debug!(%product_id, price = product.price, "price observation stored");
        Ok(())
    }
}
