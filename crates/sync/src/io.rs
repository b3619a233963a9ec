//! Bounded-time wrappers around collaborator calls.

use std::future::Future;
use std::time::Duration;

use lumen_storage::{CacheError, StorageError};

/// Run a Progress Store call, turning an elapsed timeout into
/// `StorageError::Timeout`.
pub(crate) async fn store_call<T, Fut>(
    timeout: Duration,
    operation: &'static str,
    call: Fut,
) -> Result<T, StorageError>
where
    Fut: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Run a Durable Cache call, turning an elapsed timeout into
/// `CacheError::Timeout`.
pub(crate) async fn cache_call<T, Fut>(
    timeout: Duration,
    operation: &'static str,
    call: Fut,
) -> Result<T, CacheError>
where
    Fut: Future<Output = Result<T, CacheError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
