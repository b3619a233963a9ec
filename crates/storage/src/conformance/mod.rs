//! Conformance test suite for `ProgressStore` and `DurableCache`
//! implementations.
//!
//! This module provides a backend-agnostic test suite that any backend can
//! run to verify it honours the contracts the sync engine relies on:
//!
//! - **Upsert**: create-or-update, exactly one row per (child, activity),
//!   full overwrite of the session blob
//! - **Query**: `find_all` ordering, isolation between children
//! - **Concurrency**: racing upserts on one key leave one row; upserts on
//!   different keys never interfere
//! - **Cache**: get/set/delete, overwrite, TTL expiry
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] (or
//! [`run_cache_conformance_suite`]) with a factory function that creates a
//! fresh, empty backend instance for each test:
//!
//! ```ignore
//! use lumen_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod cache;
mod concurrent;
mod query;
mod upsert;

use std::fmt;
use std::future::Future;

use crate::record::ProgressWrite;
use crate::{DurableCache, ProgressStore};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "upsert", "query", "cache").
    pub category: String,
    /// Test name (e.g. "upsert_twice_keeps_one_row").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    fn from_results(results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();
        Self {
            results,
            passed,
            failed: total - passed,
            total,
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full `ProgressStore` conformance suite.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ProgressStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(upsert::run_upsert_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    ConformanceReport::from_results(results)
}

/// Run the `DurableCache` conformance suite.
///
/// The TTL tests sleep on the tokio clock, so callers may run this under a
/// paused clock to avoid real waiting.
pub async fn run_cache_conformance_suite<C, F, Fut>(factory: F) -> ConformanceReport
where
    C: DurableCache,
    F: Fn() -> Fut,
    Fut: Future<Output = C>,
{
    ConformanceReport::from_results(cache::run_cache_tests(&factory).await)
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn make_write(progress: f64, updated_at: i64) -> ProgressWrite {
    ProgressWrite {
        progress,
        updated_at,
        session_data: serde_json::json!({
            "deviceId": "tablet-1",
            "sessionId": "session-1",
            "lastUpdate": updated_at,
        }),
    }
}
