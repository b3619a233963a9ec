use std::future::Future;
use std::time::Duration;

use super::TestResult;
use crate::DurableCache;

pub(super) async fn run_cache_tests<C, F, Fut>(factory: &F) -> Vec<TestResult>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    vec![
        TestResult::from_result(
            "cache",
            "missing_key_reads_none",
            missing_key_reads_none(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "set_then_get_round_trips",
            set_then_get_round_trips(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "set_overwrites_previous_value",
            set_overwrites_previous_value(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "delete_removes_key",
            delete_removes_key(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "expired_key_reads_none",
            expired_key_reads_none(factory).await,
        ),
    ]
}

async fn missing_key_reads_none<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let cache = factory().await;
    match cache.get("missing").await {
        Ok(None) => Ok(()),
        Ok(Some(v)) => Err(format!("expected None, got {v:?}")),
        Err(e) => Err(format!("get: {e}")),
    }
}

async fn set_then_get_round_trips<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let cache = factory().await;
    cache
        .set("k", "[1,2,3]".to_string(), Duration::from_secs(60))
        .await
        .map_err(|e| format!("set: {e}"))?;
    match cache.get("k").await.map_err(|e| format!("get: {e}"))? {
        Some(v) if v == "[1,2,3]" => Ok(()),
        other => Err(format!("unexpected value {other:?}")),
    }
}

async fn set_overwrites_previous_value<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let cache = factory().await;
    for value in ["first", "second"] {
        cache
            .set("k", value.to_string(), Duration::from_secs(60))
            .await
            .map_err(|e| format!("set {value}: {e}"))?;
    }
    match cache.get("k").await.map_err(|e| format!("get: {e}"))? {
        Some(v) if v == "second" => Ok(()),
        other => Err(format!("expected \"second\", got {other:?}")),
    }
}

async fn delete_removes_key<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let cache = factory().await;
    cache
        .set("k", "v".to_string(), Duration::from_secs(60))
        .await
        .map_err(|e| format!("set: {e}"))?;
    cache.delete("k").await.map_err(|e| format!("delete: {e}"))?;
    cache
        .delete("k")
        .await
        .map_err(|e| format!("second delete: {e}"))?;
    match cache.get("k").await.map_err(|e| format!("get: {e}"))? {
        None => Ok(()),
        Some(v) => Err(format!("expected deleted key, got {v:?}")),
    }
}

async fn expired_key_reads_none<C, F, Fut>(factory: &F) -> Result<(), String>
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    let cache = factory().await;
    cache
        .set("k", "v".to_string(), Duration::from_secs(1))
        .await
        .map_err(|e| format!("set: {e}"))?;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    match cache.get("k").await.map_err(|e| format!("get: {e}"))? {
        None => Ok(()),
        Some(v) => Err(format!("expected expired key, got {v:?}")),
    }
}
