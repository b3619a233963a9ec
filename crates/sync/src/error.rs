use lumen_storage::{CacheError, StorageError};

/// Errors surfaced by the sync core.
///
/// "Not found" conditions (unknown child on subscribe, unknown backup on
/// restore) are ordinary outcomes and do not appear here.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The update is missing an identifier or carries a non-finite progress
    /// value. Nothing was persisted.
    #[error("invalid progress update: {0}")]
    InvalidUpdate(String),

    /// The authoritative Progress Store failed. Never swallowed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A Durable Cache failure on a path where the cache write is the
    /// operation's result (e.g. storing a backup).
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A value could not be serialized for the cache.
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
