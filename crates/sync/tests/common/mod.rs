//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lumen_storage::{
    CacheError, DurableCache, MemoryCache, MemoryChildDirectory, MemoryProgressStore,
    ProgressRecord, ProgressStore, ProgressWrite, StorageError,
};
use lumen_sync::{
    ConnectionId, EventSender, ProgressUpdate, ServerEvent, SubscribeOutcome, SyncConfig,
    SyncEngine,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

// ──────────────────────────────────────────────
// Instrumented collaborators
// ──────────────────────────────────────────────

/// Progress store that counts upserts and can be made slow or failing.
#[derive(Clone)]
pub struct RecordingStore {
    pub inner: MemoryProgressStore,
    pub upserts: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
    /// Upserts allowed before the store starts failing.
    pub budget: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self {
            inner: MemoryProgressStore::default(),
            upserts: Arc::default(),
            failing: Arc::default(),
            budget: Arc::new(AtomicUsize::new(usize::MAX)),
            delay: None,
        }
    }
}

impl RecordingStore {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Let `writes` more upserts through, then fail every one after.
    pub fn fail_after(&self, writes: usize) {
        self.budget.store(writes, Ordering::SeqCst);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressStore for RecordingStore {
    async fn upsert(
        &self,
        child_id: &str,
        activity_id: &str,
        write: ProgressWrite,
    ) -> Result<ProgressRecord, StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        let spent = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if spent.is_err() {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(child_id, activity_id, write).await
    }

    async fn find_all(&self, child_id: &str) -> Result<Vec<ProgressRecord>, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.find_all(child_id).await
    }
}

/// Cache that can be switched into a failing state.
#[derive(Clone, Default)]
pub struct FlakyCache {
    pub inner: MemoryCache,
    pub failing: Arc<AtomicBool>,
}

impl FlakyCache {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableCache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

// ──────────────────────────────────────────────
// Harness
// ──────────────────────────────────────────────

pub const CHILD: &str = "child-1";

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub store: RecordingStore,
    pub cache: FlakyCache,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(RecordingStore::default())
    }

    pub fn with_store(store: RecordingStore) -> Self {
        let cache = FlakyCache::default();
        let engine = SyncEngine::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            Arc::new(MemoryChildDirectory::new([CHILD, "child-2"])),
            SyncConfig::default(),
        );
        Self {
            engine: Arc::new(engine),
            store,
            cache,
        }
    }

    /// A fresh engine over the same store and cache, as after a process
    /// restart.
    pub fn restarted(&self) -> Self {
        let engine = SyncEngine::new(
            Arc::new(self.store.clone()),
            Arc::new(self.cache.clone()),
            Arc::new(MemoryChildDirectory::new([CHILD, "child-2"])),
            SyncConfig::default(),
        );
        Self {
            engine: Arc::new(engine),
            store: self.store.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Subscribe a new connection for `device` and discard the events sent
    /// on join.
    pub async fn connect(&self, device: &str) -> Device {
        let (sender, events) = mpsc::unbounded_channel();
        let id = self.engine.registry().allocate_id();
        let outcome = self
            .engine
            .subscribe(CHILD, device, id, sender.clone())
            .await
            .expect("subscribe");
        assert_eq!(outcome, SubscribeOutcome::Joined);
        let mut device = Device {
            id,
            name: device.to_string(),
            sender,
            events,
        };
        device.take_events();
        device
    }

    pub async fn stored_progress(&self, activity: &str) -> Option<f64> {
        self.store.inner.get(CHILD, activity).await.map(|r| r.progress)
    }
}

pub struct Device {
    pub id: ConnectionId,
    pub name: String,
    pub sender: EventSender,
    pub events: UnboundedReceiver<ServerEvent>,
}

impl Device {
    /// Everything delivered so far.
    pub fn take_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn update(&self, activity: &str, progress: f64, timestamp: i64) -> ProgressUpdate {
        update(&self.name, activity, progress, timestamp)
    }
}

pub fn update(device: &str, activity: &str, progress: f64, timestamp: i64) -> ProgressUpdate {
    ProgressUpdate {
        child_id: CHILD.to_string(),
        activity_id: activity.to_string(),
        progress,
        timestamp,
        device_id: device.to_string(),
        session_id: format!("{device}-session"),
        metadata: None,
    }
}

pub fn event_names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}
