//! Per-device holding area for updates that could not reach the engine
//! live.
//!
//! The in-memory queue is the source of truth within a process lifetime.
//! Each change rewrites the device's full list into the Durable Cache under
//! `offline_queue:{deviceId}` so a restarted process can pick it up again.
//! The first time a process touches a device, whatever the mirror holds is
//! merged in ahead of the new updates before anything is rewritten.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use lumen_storage::DurableCache;
use tokio::sync::Mutex;

use crate::io::cache_call;
use crate::types::ProgressUpdate;

/// Cache key of a device's queue mirror.
pub fn queue_key(device_id: &str) -> String {
    format!("offline_queue:{device_id}")
}

#[derive(Default)]
struct DeviceQueue {
    pending: Vec<ProgressUpdate>,
    /// Set once the queue has been drained and unlinked from the map.
    /// Writers that raced the drain must fetch a fresh queue.
    retired: bool,
    /// False until the mirror left by an earlier process has been merged.
    hydrated: bool,
}

type SharedQueue = Arc<Mutex<DeviceQueue>>;

#[derive(Default)]
struct Queues {
    active: HashMap<String, SharedQueue>,
    /// Devices whose mirror this process has already taken over.
    adopted: HashSet<String>,
}

pub struct OfflineQueueManager {
    cache: Arc<dyn DurableCache>,
    queues: Mutex<Queues>,
    ttl: Duration,
    io_timeout: Duration,
}

impl OfflineQueueManager {
    pub fn new(cache: Arc<dyn DurableCache>, ttl: Duration, io_timeout: Duration) -> Self {
        Self {
            cache,
            queues: Mutex::new(Queues::default()),
            ttl,
            io_timeout,
        }
    }

    async fn queue_for(&self, device_id: &str) -> SharedQueue {
        let mut queues = self.queues.lock().await;
        let adopted = !queues.adopted.insert(device_id.to_string());
        queues
            .active
            .entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DeviceQueue {
                    hydrated: adopted,
                    ..DeviceQueue::default()
                }))
            })
            .clone()
    }

    /// Merge a mirror written by an earlier process in front of `queue`.
    async fn hydrate(&self, device_id: &str, queue: &mut DeviceQueue) {
        if queue.hydrated {
            return;
        }
        queue.hydrated = true;
        let mut recovered = self.recover(device_id).await;
        if !recovered.is_empty() {
            recovered.append(&mut queue.pending);
            queue.pending = recovered;
        }
    }

    /// Append `update` to the device's queue and mirror the whole queue.
    ///
    /// A failed mirror write is logged; the update stays queued in memory.
    /// Returns the queue length after the append.
    pub async fn enqueue(&self, device_id: &str, update: ProgressUpdate) -> usize {
        loop {
            let queue = self.queue_for(device_id).await;
            let mut queue = queue.lock().await;
            if queue.retired {
                continue;
            }
            self.hydrate(device_id, &mut queue).await;
            queue.pending.push(update);
            self.mirror(device_id, &queue.pending).await;
            tracing::debug!(device_id, pending = queue.pending.len(), "queued offline update");
            return queue.pending.len();
        }
    }

    /// Put updates back at the front of the device's queue, ahead of
    /// anything enqueued since they were drained.
    pub async fn requeue_front(&self, device_id: &str, mut updates: Vec<ProgressUpdate>) {
        if updates.is_empty() {
            return;
        }
        loop {
            let queue = self.queue_for(device_id).await;
            let mut queue = queue.lock().await;
            if queue.retired {
                continue;
            }
            self.hydrate(device_id, &mut queue).await;
            updates.append(&mut queue.pending);
            queue.pending = updates;
            self.mirror(device_id, &queue.pending).await;
            return;
        }
    }

    /// Take every queued update for the device, in enqueue order.
    ///
    /// When the process holds nothing for the device (for instance after a
    /// restart) the cache mirror is read instead. The mirror itself is left
    /// in place; call [`clear_persisted`](Self::clear_persisted) once the
    /// updates have been replayed.
    pub async fn drain(&self, device_id: &str) -> Vec<ProgressUpdate> {
        let (queue, first_touch) = {
            let mut queues = self.queues.lock().await;
            let queue = queues.active.remove(device_id);
            (queue, queues.adopted.insert(device_id.to_string()))
        };
        match queue {
            Some(queue) => {
                let mut queue = queue.lock().await;
                self.hydrate(device_id, &mut queue).await;
                queue.retired = true;
                std::mem::take(&mut queue.pending)
            }
            None if first_touch => self.recover(device_id).await,
            None => Vec::new(),
        }
    }

    /// Drop the device's cache mirror after a successful replay. If updates
    /// were queued again meanwhile, the mirror is rewritten with them
    /// instead.
    pub async fn clear_persisted(&self, device_id: &str) {
        let queue = self.queues.lock().await.active.get(device_id).cloned();
        if let Some(queue) = queue {
            let queue = queue.lock().await;
            if !queue.retired && !queue.pending.is_empty() {
                self.mirror(device_id, &queue.pending).await;
                return;
            }
        }
        let key = queue_key(device_id);
        if let Err(e) = cache_call(self.io_timeout, "delete", self.cache.delete(&key)).await {
            tracing::warn!(device_id, error = %e, "failed to clear offline queue mirror");
        }
    }

    /// Number of updates held in memory for the device.
    pub async fn pending(&self, device_id: &str) -> usize {
        let queue = self.queues.lock().await.active.get(device_id).cloned();
        match queue {
            Some(queue) => queue.lock().await.pending.len(),
            None => 0,
        }
    }

    async fn mirror(&self, device_id: &str, pending: &[ProgressUpdate]) {
        let encoded = match serde_json::to_string(pending) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(device_id, error = %e, "failed to encode offline queue");
                return;
            }
        };
        let key = queue_key(device_id);
        if let Err(e) = cache_call(
            self.io_timeout,
            "set",
            self.cache.set(&key, encoded, self.ttl),
        )
        .await
        {
            tracing::warn!(device_id, error = %e, "failed to mirror offline queue");
        }
    }

    async fn recover(&self, device_id: &str) -> Vec<ProgressUpdate> {
        let key = queue_key(device_id);
        let raw = match cache_call(self.io_timeout, "get", self.cache.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(device_id, error = %e, "failed to read offline queue mirror");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<ProgressUpdate>>(&raw) {
            Ok(updates) => {
                if !updates.is_empty() {
                    tracing::info!(device_id, count = updates.len(), "recovered offline queue");
                }
                updates
            }
            Err(e) => {
                tracing::warn!(device_id, error = %e, "discarding unreadable offline queue mirror");
                Vec::new()
            }
        }
    }
}
