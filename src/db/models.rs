use chrono::{DateTime, Utc};

use crate::types::PersistedListing;

/// Row type for the `listings` table (migrations/0001_create_listings.sql).
#[derive(Debug, sqlx::FromRow)]
pub struct ListingRow {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub link: String,
    pub budget_text: String,
    pub amount_min: i64,
    pub amount_max: i64,
    /// Unix nanoseconds.
    pub created_at: i64,
}

impl From<ListingRow> for PersistedListing {
    fn from(row: ListingRow) -> Self {
        Self {
            id: row.id,
            source: row.source,
            external_id: row.external_id,
            title: row.title,
            link: row.link,
            budget_text: row.budget_text,
            amount_min: row.amount_min,
            amount_max: row.amount_max,
            created_at: DateTime::<Utc>::from_timestamp_nanos(row.created_at),
        }
    }
}
