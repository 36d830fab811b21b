pub mod models;
pub mod store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{NewListing, PersistedListing};

pub use store::SqliteListingStore;

/// Durable insert-if-absent keyed by `(source, external_id)`.
///
/// Uniqueness under concurrent inserts of the same key is the store's job;
/// callers never check for existence themselves.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Returns the stored row and whether this call created it. An existing
    /// row is returned untouched.
    async fn insert_if_absent(&self, listing: &NewListing) -> Result<(PersistedListing, bool)>;
}
