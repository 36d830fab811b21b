use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::models::ListingRow;
use super::ListingStore;
use crate::error::Result;
use crate::types::{NewListing, PersistedListing};

const INSERT_LISTING: &str = r#"
    INSERT INTO listings (
        source, external_id, title, link, budget_text, amount_min, amount_max, created_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (source, external_id) DO NOTHING
    RETURNING id, source, external_id, title, link, budget_text, amount_min, amount_max, created_at
"#;

const SELECT_LISTING: &str = r#"
    SELECT id, source, external_id, title, link, budget_text, amount_min, amount_max, created_at
    FROM listings
    WHERE source = ? AND external_id = ?
"#;

/// Open (creating if needed) the SQLite file and apply pending migrations.
pub async fn open_pool(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

/// SQLite-backed listing store. The `UNIQUE (source, external_id)` constraint
/// does the deduplication.
#[derive(Clone)]
pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find(&self, source: &str, external_id: &str) -> Result<ListingRow> {
        let row = sqlx::query_as::<_, ListingRow>(SELECT_LISTING)
            .bind(source)
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn insert_if_absent(&self, l: &NewListing) -> Result<(PersistedListing, bool)> {
        let created_at = now_ns() as i64;

        let inserted = sqlx::query_as::<_, ListingRow>(INSERT_LISTING)
            .bind(&l.source)
            .bind(&l.external_id)
            .bind(&l.title)
            .bind(&l.link)
            .bind(&l.budget_text)
            .bind(l.amount_min)
            .bind(l.amount_max)
            .bind(created_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok((row.into(), true)),
            None => {
                debug!(source = %l.source, external_id = %l.external_id, "listing already stored");
                let existing = self.find(&l.source, &l.external_id).await?;
                Ok((existing.into(), false))
            }
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
