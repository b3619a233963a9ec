use std::future::Future;

use super::{make_write, TestResult};
use crate::ProgressStore;

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "find_all_unknown_child_is_empty",
            find_all_unknown_child_is_empty(factory).await,
        ),
        TestResult::from_result(
            "query",
            "find_all_orders_by_activity",
            find_all_orders_by_activity(factory).await,
        ),
        TestResult::from_result(
            "query",
            "children_are_isolated",
            children_are_isolated(factory).await,
        ),
    ]
}

async fn find_all_unknown_child_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let rows = store
        .find_all("nobody")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if !rows.is_empty() {
        return Err(format!("expected no rows, got {}", rows.len()));
    }
    Ok(())
}

async fn find_all_orders_by_activity<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    for activity in ["math-3", "math-1", "math-2"] {
        store
            .upsert("child-1", activity, make_write(10.0, 1_000))
            .await
            .map_err(|e| format!("upsert {activity}: {e}"))?;
    }
    let ids: Vec<String> = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?
        .into_iter()
        .map(|r| r.activity_id)
        .collect();
    if ids != ["math-1", "math-2", "math-3"] {
        return Err(format!("unexpected order: {ids:?}"));
    }
    Ok(())
}

async fn children_are_isolated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .upsert("child-1", "math-1", make_write(10.0, 1_000))
        .await
        .map_err(|e| format!("upsert child-1: {e}"))?;
    store
        .upsert("child-2", "math-1", make_write(90.0, 1_000))
        .await
        .map_err(|e| format!("upsert child-2: {e}"))?;

    let rows = store
        .find_all("child-1")
        .await
        .map_err(|e| format!("find_all: {e}"))?;
    if rows.len() != 1 || rows[0].progress != 10.0 {
        return Err(format!("child-1 sees foreign rows: {rows:?}"));
    }
    Ok(())
}
