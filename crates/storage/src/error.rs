/// Errors returned by a `ProgressStore` or `ChildDirectory` implementation.
///
/// These represent trouble with the authoritative record and are always
/// surfaced to the caller of the operation that hit them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No progress record with the given (child_id, activity_id).
    #[error("progress record not found: {child_id}/{activity_id}")]
    NotFound {
        child_id: String,
        activity_id: String,
    },

    /// The call did not complete within the configured I/O timeout.
    /// Retryable.
    #[error("storage operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned by a `DurableCache` implementation.
///
/// Callers treat most of these as best-effort failures: logged, never
/// blocking the authoritative write path.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The call did not complete within the configured I/O timeout.
    #[error("cache operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A backend-specific cache error (connection refused, eviction, etc.).
    #[error("cache backend error: {0}")]
    Backend(String),
}
