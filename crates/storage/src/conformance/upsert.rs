use std::future::Future;

use super::{make_write, TestResult};
use crate::ProgressStore;

pub(super) async fn run_upsert_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "upsert",
            "upsert_creates_row",
            upsert_creates_row(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "upsert_twice_keeps_one_row",
            upsert_twice_keeps_one_row(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "upsert_overwrites_session_data",
            upsert_overwrites_session_data(factory).await,
        ),
        TestResult::from_result(
            "upsert",
            "upsert_stores_values_verbatim",
            upsert_stores_values_verbatim(factory).await,
        ),
    ]
}

async fn upsert_creates_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let record = store
        .upsert("child-1", "reading-1", make_write(40.0, 1_000))
        .await
        .map_err(|e| format!("upsert: {e}"))?;

    if record.child_id != "child-1" || record.activity_id != "reading-1" {
        return Err(format!(
            "returned record has wrong key: {}/{}",
            record.child_id, record.activity_id
        ));
    }
    let rows = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 row, got {}", rows.len()));
    }
    Ok(())
}

async fn upsert_twice_keeps_one_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .upsert("child-1", "reading-1", make_write(40.0, 1_000))
        .await
        .map_err(|e| format!("first upsert: {e}"))?;
    store
        .upsert("child-1", "reading-1", make_write(55.0, 2_000))
        .await
        .map_err(|e| format!("second upsert: {e}"))?;

    let rows = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if rows.len() != 1 {
        return Err(format!("expected 1 row after two upserts, got {}", rows.len()));
    }
    if rows[0].progress != 55.0 || rows[0].updated_at != 2_000 {
        return Err(format!(
            "expected second write to win, got progress={} updated_at={}",
            rows[0].progress, rows[0].updated_at
        ));
    }
    Ok(())
}

async fn upsert_overwrites_session_data<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut first = make_write(10.0, 1_000);
    first.session_data = serde_json::json!({"hints": 3, "deviceId": "phone-1"});
    store
        .upsert("child-1", "reading-1", first)
        .await
        .map_err(|e| format!("first upsert: {e}"))?;

    let mut second = make_write(20.0, 2_000);
    second.session_data = serde_json::json!({"deviceId": "tablet-1"});
    let record = store
        .upsert("child-1", "reading-1", second)
        .await
        .map_err(|e| format!("second upsert: {e}"))?;

    if record.session_data.get("hints").is_some() {
        return Err("session data was merged, expected full overwrite".to_string());
    }
    Ok(())
}

async fn upsert_stores_values_verbatim<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    // Out-of-range values are stored as given; range policy lives upstream.
    let record = store
        .upsert("child-1", "reading-1", make_write(140.5, 3_000))
        .await
        .map_err(|e| format!("upsert: {e}"))?;
    if record.progress != 140.5 {
        return Err(format!("expected 140.5, got {}", record.progress));
    }
    Ok(())
}
