use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, StorageError};
use crate::record::{ProgressRecord, ProgressWrite};

/// The authoritative store of per-activity progress.
///
/// ## Upsert Semantics
///
/// `upsert` is create-or-update keyed by (child_id, activity_id). Applying
/// the same write twice leaves exactly one row whose state equals the
/// second write. There is no insert-only path.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared by the
/// sync engine across connection tasks and axum handlers.
#[async_trait]
pub trait ProgressStore: Send + Sync + 'static {
    /// Create or overwrite the row for (child_id, activity_id) and return
    /// the stored record.
    async fn upsert(
        &self,
        child_id: &str,
        activity_id: &str,
        write: ProgressWrite,
    ) -> Result<ProgressRecord, StorageError>;

    /// Every progress row of a child, ordered by activity id.
    ///
    /// A child with no rows yields an empty list, not an error.
    async fn find_all(&self, child_id: &str) -> Result<Vec<ProgressRecord>, StorageError>;
}

/// Key/value store with per-key expiry, used for short-lived coordination
/// data: conflict windows, offline queue mirrors, and backups.
#[async_trait]
pub trait DurableCache: Send + Sync + 'static {
    /// Read a key. Expired and missing keys both yield `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Write a key, replacing any previous value and resetting its TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Answers whether a child account exists. Backed by the account system,
/// which lives outside the sync core.
#[async_trait]
pub trait ChildDirectory: Send + Sync + 'static {
    async fn child_exists(&self, child_id: &str) -> Result<bool, StorageError>;
}
