//! Tunables for the sync core.
//!
//! Defaults are the protocol constants devices rely on: a 5 second conflict
//! window, the 10 most recent updates kept for 5 minutes, offline queues
//! mirrored for 24 hours and backups kept for 7 days.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ResolutionStrategy;

/// Accepted range for `recent_update_limit`.
pub const RECENT_UPDATE_LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Two updates from different devices closer than this are concurrent.
    pub conflict_window_ms: u64,
    /// Entries kept in the per-(child, activity) recent-update window.
    pub recent_update_limit: usize,
    pub recent_update_ttl_secs: u64,
    pub offline_queue_ttl_secs: u64,
    pub backup_ttl_secs: u64,
    /// Upper bound on any single Progress Store or Durable Cache call.
    pub io_timeout_ms: u64,
    pub resolution_strategy: ResolutionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_window_ms: 5_000,
            recent_update_limit: 10,
            recent_update_ttl_secs: 5 * 60,
            offline_queue_ttl_secs: 24 * 60 * 60,
            backup_ttl_secs: 7 * 24 * 60 * 60,
            io_timeout_ms: 5_000,
            resolution_strategy: ResolutionStrategy::Highest,
        }
    }
}

impl SyncConfig {
    pub fn recent_update_ttl(&self) -> Duration {
        Duration::from_secs(self.recent_update_ttl_secs)
    }

    pub fn offline_queue_ttl(&self) -> Duration {
        Duration::from_secs(self.offline_queue_ttl_secs)
    }

    pub fn backup_ttl(&self) -> Duration {
        Duration::from_secs(self.backup_ttl_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Override fields from `LUMEN_*` variables read through `lookup`.
    ///
    /// Unparseable or out-of-range values are logged and ignored, leaving
    /// the previous setting in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "LUMEN_CONFLICT_WINDOW_MS", |_: &u64| true) {
            self.conflict_window_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "LUMEN_RECENT_UPDATE_LIMIT", |v: &usize| {
            RECENT_UPDATE_LIMIT_RANGE.contains(v)
        }) {
            self.recent_update_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "LUMEN_IO_TIMEOUT_MS", |v: &u64| *v > 0) {
            self.io_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "LUMEN_RESOLUTION_STRATEGY", |_: &ResolutionStrategy| {
            true
        }) {
            self.resolution_strategy = v;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !RECENT_UPDATE_LIMIT_RANGE.contains(&self.recent_update_limit) {
            return Err(format!(
                "recent_update_limit must be within {}..={}, got {}",
                RECENT_UPDATE_LIMIT_RANGE.start(),
                RECENT_UPDATE_LIMIT_RANGE.end(),
                self.recent_update_limit
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err("io_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }
}

fn parse_var<F, T, A>(lookup: &F, key: &str, accept: A) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    A: Fn(&T) -> bool,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) if accept(&v) => Some(v),
        Ok(_) => {
            tracing::warn!(key, value = %raw, "ignoring out-of-range configuration value");
            None
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}
