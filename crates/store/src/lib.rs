//! Catalog and depth-snapshot persistence.
//!
//! The store owns its schema. `PgStore` expects three tables:
//!
//! - `markets (id text primary key, platform text, description text,
//!    end_date timestamptz null)`
//! - `tokens (id text primary key, market_id text references markets,
//!    outcome text)`
//! - `order_book_snapshots (time timestamptz, token_id text, side text,
//!    level smallint, price bigint, size bigint,
//!    ingested_at timestamptz default now())` with
//!    `(token_id, time, side, level)` unique and indexed for
//!    `(token_id, time desc)` reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A market as persisted in the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketRecord {
    pub id: String,
    pub platform: String,
    pub description: String,
    pub end_date: Option<DateTime<Utc>>,
}

/// A tradable outcome token belonging to a market.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenRecord {
    pub id: String,
    pub market_id: String,
    pub outcome: String,
}

/// One depth row: `level` is the 0-based best-first position on `side`.
/// `time` carries the event time; the ingestion time comes from the
/// database default.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotRow {
    pub time: DateTime<Utc>,
    pub token_id: String,
    pub side: &'static str,
    pub level: i16,
    pub price: i64,
    pub size: i64,
}

/// Operations the collector needs from its backing store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn upsert_market(&self, market: &MarketRecord) -> Result<()>;

    async fn upsert_token(&self, token: &TokenRecord) -> Result<()>;

    async fn get_token_ids_for_platform(&self, platform: &str) -> Result<Vec<String>>;

    /// Bulk-inserts a batch of depth rows, returning the number written.
    async fn insert_order_book_snapshot_batch(&self, rows: &[SnapshotRow]) -> Result<u64>;
}

/// Postgres/TimescaleDB-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_market(&self, market: &MarketRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (id, platform, description, end_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET platform = EXCLUDED.platform,
                description = EXCLUDED.description,
                end_date = EXCLUDED.end_date
            "#,
        )
        .bind(&market.id)
        .bind(&market.platform)
        .bind(&market.description)
        .bind(market.end_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_token(&self, token: &TokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (id, market_id, outcome)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET market_id = EXCLUDED.market_id,
                outcome = EXCLUDED.outcome
            "#,
        )
        .bind(&token.id)
        .bind(&token.market_id)
        .bind(&token.outcome)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token_ids_for_platform(&self, platform: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT t.id
            FROM tokens t
            JOIN markets m ON m.id = t.market_id
            WHERE m.platform = $1
            ORDER BY t.id
            "#,
        )
        .bind(platform)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_order_book_snapshot_batch(&self, rows: &[SnapshotRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // One round-trip for the whole batch: bind parallel arrays and let
        // UNNEST expand them server-side.
        let mut times = Vec::with_capacity(rows.len());
        let mut token_ids = Vec::with_capacity(rows.len());
        let mut sides = Vec::with_capacity(rows.len());
        let mut levels = Vec::with_capacity(rows.len());
        let mut prices = Vec::with_capacity(rows.len());
        let mut sizes = Vec::with_capacity(rows.len());
        for row in rows {
            times.push(row.time);
            token_ids.push(row.token_id.clone());
            sides.push(row.side.to_string());
            levels.push(row.level);
            prices.push(row.price);
            sizes.push(row.size);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO order_book_snapshots (time, token_id, side, level, price, size)
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::text[], $3::text[],
                $4::smallint[], $5::bigint[], $6::bigint[]
            )
            ON CONFLICT (token_id, time, side, level) DO NOTHING
            "#,
        )
        .bind(&times)
        .bind(&token_ids)
        .bind(&sides)
        .bind(&levels)
        .bind(&prices)
        .bind(&sizes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
