use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use super::ListingStore;
use crate::error::{AppError, Result};
use crate::types::{NewListing, PersistedListing};

/// In-process listing store for orchestrator tests.
///
/// Optionally rewrites the link it stores so tests can see that callers use
/// the stored values, and can be told to fail for specific external ids.
#[derive(Default)]
pub struct MemoryListingStore {
    /// (source, external_id) → stored row
    rows: DashMap<(String, String), PersistedListing>,
    /// external ids whose insert returns an error
    failing: DashSet<String>,
    next_id: AtomicI64,
    inserts: AtomicUsize,
    canonical_link_prefix: Option<String>,
}

impl MemoryListingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store every link as `{prefix}/{source}/{external_id}`.
    pub fn with_canonical_links(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            canonical_link_prefix: Some(prefix.to_string()),
            ..Self::default()
        })
    }

    pub fn fail_on(&self, external_id: &str) {
        self.failing.insert(external_id.to_string());
    }

    pub fn seed(&self, listing: &NewListing) {
        let row = self.to_row(listing);
        self.rows
            .insert((listing.source.clone(), listing.external_id.clone()), row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Successful inserts that created a row.
    pub fn created_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn get(&self, source: &str, external_id: &str) -> Option<PersistedListing> {
        self.rows
            .get(&(source.to_string(), external_id.to_string()))
            .map(|r| r.value().clone())
    }

    fn to_row(&self, l: &NewListing) -> PersistedListing {
        let link = match &self.canonical_link_prefix {
            Some(prefix) => format!("{prefix}/{}/{}", l.source, l.external_id),
            None => l.link.clone(),
        };
        PersistedListing {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            source: l.source.clone(),
            external_id: l.external_id.clone(),
            title: l.title.clone(),
            link,
            budget_text: l.budget_text.clone(),
            amount_min: l.amount_min,
            amount_max: l.amount_max,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn insert_if_absent(&self, listing: &NewListing) -> Result<(PersistedListing, bool)> {
        if self.failing.contains(&listing.external_id) {
            return Err(AppError::Parse(format!(
                "injected store failure for {}",
                listing.external_id
            )));
        }

        let key = (listing.source.clone(), listing.external_id.clone());
        match self.rows.entry(key) {
            Entry::Occupied(e) => Ok((e.get().clone(), false)),
            Entry::Vacant(e) => {
                let row = self.to_row(listing);
                e.insert(row.clone());
                self.inserts.fetch_add(1, Ordering::SeqCst);
                Ok((row, true))
            }
        }
    }
}
