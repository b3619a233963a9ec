//! In-memory backends for the collaborator traits.
//!
//! These back `lumen serve` when no external database is configured and
//! give tests an isolated, inspectable store per test case.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{CacheError, StorageError};
use crate::record::{ProgressRecord, ProgressWrite};
use crate::traits::{ChildDirectory, DurableCache, ProgressStore};

/// Rows keyed by child, then activity. The BTreeMap keeps `find_all`
/// ordered by activity id without a sort.
type ProgressRows = HashMap<String, BTreeMap<String, ProgressRecord>>;

/// `ProgressStore` held entirely in process memory.
///
/// Cloning is cheap and clones share the same rows.
#[derive(Clone, Default)]
pub struct MemoryProgressStore {
    rows: Arc<RwLock<ProgressRows>>,
    /// Activity catalogue used for the `activity_title` join.
    activities: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity title so that rows for it carry the title.
    pub async fn register_activity(&self, activity_id: &str, title: &str) {
        self.activities
            .write()
            .await
            .insert(activity_id.to_string(), title.to_string());
    }

    /// Read a single row.
    pub async fn get(&self, child_id: &str, activity_id: &str) -> Option<ProgressRecord> {
        let rows = self.rows.read().await;
        let mut record = rows.get(child_id)?.get(activity_id)?.clone();
        record.activity_title = self.activities.read().await.get(activity_id).cloned();
        Some(record)
    }

    /// Delete a single row. Returns `StorageError::NotFound` when absent.
    pub async fn remove(&self, child_id: &str, activity_id: &str) -> Result<(), StorageError> {
        let mut rows = self.rows.write().await;
        let removed = rows
            .get_mut(child_id)
            .and_then(|activities| activities.remove(activity_id));
        if rows.get(child_id).is_some_and(BTreeMap::is_empty) {
            rows.remove(child_id);
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                child_id: child_id.to_string(),
                activity_id: activity_id.to_string(),
            }),
        }
    }

    /// Total number of rows across all children.
    pub async fn len(&self) -> usize {
        self.rows.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn upsert(
        &self,
        child_id: &str,
        activity_id: &str,
        write: ProgressWrite,
    ) -> Result<ProgressRecord, StorageError> {
        let activity_title = self.activities.read().await.get(activity_id).cloned();
        let record = ProgressRecord {
            child_id: child_id.to_string(),
            activity_id: activity_id.to_string(),
            activity_title,
            progress: write.progress,
            updated_at: write.updated_at,
            session_data: write.session_data,
        };
        self.rows
            .write()
            .await
            .entry(child_id.to_string())
            .or_default()
            .insert(activity_id.to_string(), record.clone());
        Ok(record)
    }

    async fn find_all(&self, child_id: &str) -> Result<Vec<ProgressRecord>, StorageError> {
        let rows = self.rows.read().await;
        let activities = self.activities.read().await;
        Ok(rows
            .get(child_id)
            .map(|by_activity| {
                by_activity
                    .values()
                    .cloned()
                    .map(|mut record| {
                        record.activity_title = activities.get(&record.activity_id).cloned();
                        record
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A cached value and the instant after which it is no longer visible.
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Key count at which a `set` first sweeps out expired entries.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Size that triggers the next sweep. Doubles past the live count so
    /// a cache full of unexpired keys is not rescanned on every write.
    sweep_at: usize,
    threshold: usize,
}

impl CacheState {
    fn with_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            entries: HashMap::new(),
            sweep_at: threshold,
            threshold,
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.sweep_at = self.threshold.max(self.entries.len() * 2);
        before - self.entries.len()
    }
}

/// `DurableCache` held in process memory.
///
/// Expiry is measured on the tokio clock, so tests running with a paused
/// clock can advance past a TTL deterministically. An expired entry is
/// dropped when it is read, and a `set` that grows the map past the sweep
/// threshold drops every expired entry.
#[derive(Clone)]
pub struct MemoryCache {
    state: Arc<RwLock<CacheState>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_threshold(threshold: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::with_threshold(threshold))),
        }
    }

    /// Number of live (unexpired) keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.state.write().await.purge_expired(Instant::now())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DurableCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let state = self.state.read().await;
            match state.entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: drop it, unless a writer refreshed it in between.
        let mut state = self.state.write().await;
        if state.entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            state.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if state.entries.len() >= state.sweep_at && !state.entries.contains_key(key) {
            let dropped = state.purge_expired(now);
            tracing::debug!(dropped, remaining = state.entries.len(), "swept expired cache entries");
        }
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.entries.remove(key);
        Ok(())
    }
}

/// `ChildDirectory` backed by a set of known child ids.
#[derive(Clone, Default)]
pub struct MemoryChildDirectory {
    children: Arc<RwLock<HashSet<String>>>,
    /// When set, every child id is reported as existing.
    open: bool,
}

impl MemoryChildDirectory {
    /// A directory that knows exactly the given children.
    pub fn new<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            children: Arc::new(RwLock::new(children.into_iter().map(Into::into).collect())),
            open: false,
        }
    }

    /// A directory that accepts any child id. Used when account checks are
    /// handled upstream of the sync service.
    pub fn open() -> Self {
        Self {
            children: Arc::default(),
            open: true,
        }
    }

    pub async fn insert(&self, child_id: &str) {
        self.children.write().await.insert(child_id.to_string());
    }
}

#[async_trait]
impl ChildDirectory for MemoryChildDirectory {
    async fn child_exists(&self, child_id: &str) -> Result<bool, StorageError> {
        if self.open {
            return Ok(true);
        }
        Ok(self.children.read().await.contains(child_id))
    }
}
