use std::future::Future;
use std::sync::Arc;

use super::{make_write, TestResult};
use crate::{ProgressStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_upserts_same_key_leave_one_row",
            concurrent_upserts_same_key_leave_one_row(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_upserts_different_keys_all_land",
            concurrent_upserts_different_keys_all_land(factory).await,
        ),
    ]
}

// ── Same key: last writer wins, one row ─────────────────────────────────────

/// N tasks upsert the same (child, activity) in parallel. Whatever the
/// interleaving, exactly one row remains and it holds one of the written
/// values.
async fn concurrent_upserts_same_key_leave_one_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.upsert("child-1", "math-1", make_write(i as f64, i as i64))
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
    }

    let rows = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected exactly 1 row, got {}", rows.len()));
    }
    let progress = rows[0].progress;
    if !(0.0..N as f64).contains(&progress) {
        return Err(format!("final progress {progress} was never written"));
    }
    Ok(())
}

// ── Different keys: no interference ─────────────────────────────────────────

async fn concurrent_upserts_different_keys_all_land<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.upsert("child-1", &format!("activity-{i:02}"), make_write(50.0, 1_000))
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
    }

    let rows = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if rows.len() != N {
        return Err(format!("expected {N} rows, got {}", rows.len()));
    }
    Ok(())
}
