//! The Sync Engine: single entry point for applying progress updates with
//! conflict safety.
//!
//! For each update the engine, under a per-(child, activity) lock:
//! 1. reads the recent-update window `progress:{childId}:{activityId}`
//! 2. picks entries from other devices within the conflict window
//! 3. resolves them with the incoming update when any exist
//! 4. upserts the (possibly resolved) value into the Progress Store
//! 5. prepends the update to the window and rewrites it
//! 6. broadcasts `progress-resolved` to the child's room, or
//!    `progress-updated` to every other connection of the child
//!
//! Store failures propagate to the caller. Cache failures are logged and
//! degrade conflict detection to "no conflicts", never blocking a write.

use std::sync::Arc;

use lumen_storage::{ChildDirectory, DurableCache, ProgressRecord, ProgressStore, ProgressWrite};

use crate::backup::BackupManager;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::io::{cache_call, store_call};
use crate::keyed_lock::KeyedLock;
use crate::offline::OfflineQueueManager;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry, EventSender, SubscribeOutcome};
use crate::resolver::ConflictResolver;
use crate::types::{now_millis, Metadata, ProgressConflict, ProgressUpdate};

/// Cache key of the recent-update window for one (child, activity).
pub fn recent_updates_key(child_id: &str, activity_id: &str) -> String {
    format!("progress:{child_id}:{activity_id}")
}

/// What `apply_update` did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The row as stored.
    pub record: ProgressRecord,
    /// Present when the update collided with other devices.
    pub conflict: Option<ProgressConflict>,
}

pub struct SyncEngine {
    store: Arc<dyn ProgressStore>,
    cache: Arc<dyn DurableCache>,
    registry: ConnectionRegistry,
    offline: OfflineQueueManager,
    backups: BackupManager,
    resolver: ConflictResolver,
    locks: KeyedLock<(String, String)>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        cache: Arc<dyn DurableCache>,
        directory: Arc<dyn ChildDirectory>,
        config: SyncConfig,
    ) -> Self {
        let io_timeout = config.io_timeout();
        Self {
            registry: ConnectionRegistry::new(directory, io_timeout),
            offline: OfflineQueueManager::new(
                cache.clone(),
                config.offline_queue_ttl(),
                io_timeout,
            ),
            backups: BackupManager::new(
                store.clone(),
                cache.clone(),
                config.backup_ttl(),
                io_timeout,
            ),
            resolver: ConflictResolver::new(config.resolution_strategy),
            locks: KeyedLock::new(),
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn offline(&self) -> &OfflineQueueManager {
        &self.offline
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Number of (child, activity) pairs with an update in flight.
    pub fn updates_in_flight(&self) -> usize {
        self.locks.active_keys()
    }

    // ── Live updates ─────────────────────────────────────────────────────────

    /// Apply one update. `origin` is the connection that sent it, which is
    /// not echoed a `progress-updated` for its own write.
    pub async fn apply_update(
        &self,
        mut update: ProgressUpdate,
        origin: Option<ConnectionId>,
    ) -> Result<UpdateOutcome, SyncError> {
        update.validate()?;

        let _guard = self
            .locks
            .lock((update.child_id.clone(), update.activity_id.clone()))
            .await;

        let key = recent_updates_key(&update.child_id, &update.activity_id);
        let recent = self.recent_updates(&key).await;

        let concurrent: Vec<ProgressUpdate> = recent
            .iter()
            .filter(|u| {
                u.device_id != update.device_id
                    && u.timestamp.abs_diff(update.timestamp) < self.config.conflict_window_ms
            })
            .cloned()
            .collect();

        let conflict = if concurrent.is_empty() {
            None
        } else {
            let mut contributors = concurrent;
            contributors.push(update.clone());
            self.resolver.resolve(contributors)
        };

        if let Some(conflict) = &conflict {
            let latest = conflict.latest();
            tracing::info!(
                child_id = %update.child_id,
                activity_id = %update.activity_id,
                devices = ?conflict.devices(),
                latest_device = %latest.device_id,
                latest_progress = latest.progress,
                resolved_progress = conflict.resolved_progress,
                strategy = %conflict.resolution_strategy,
                "resolved concurrent progress updates"
            );
            update.progress = conflict.resolved_progress;
        }

        let write = ProgressWrite {
            progress: update.progress,
            updated_at: update.timestamp,
            session_data: update.session_data(),
        };
        let record = store_call(
            self.config.io_timeout(),
            "upsert",
            self.store
                .upsert(&update.child_id, &update.activity_id, write),
        )
        .await?;

        self.remember_update(&key, recent, &update).await;

        match &conflict {
            Some(conflict) => {
                let event = ServerEvent::ProgressResolved {
                    child_id: update.child_id.clone(),
                    activity_id: update.activity_id.clone(),
                    resolved_progress: conflict.resolved_progress,
                    resolution_strategy: conflict.resolution_strategy,
                    timestamp: update.timestamp,
                };
                self.registry.broadcast(&update.child_id, &event, None).await;
            }
            None => {
                let event = ServerEvent::ProgressUpdated {
                    child_id: update.child_id.clone(),
                    activity_id: update.activity_id.clone(),
                    progress: update.progress,
                    timestamp: update.timestamp,
                    device_id: update.device_id.clone(),
                    metadata: update.metadata.clone(),
                };
                self.registry
                    .broadcast(&update.child_id, &event, origin)
                    .await;
            }
        }

        Ok(UpdateOutcome { record, conflict })
    }

    /// Read the recent-update window. Any failure reads as empty.
    async fn recent_updates(&self, key: &str) -> Vec<ProgressUpdate> {
        let raw = match cache_call(self.config.io_timeout(), "get", self.cache.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key, error = %e, "recent updates unavailable, skipping conflict check");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "discarding unreadable recent updates");
            Vec::new()
        })
    }

    /// Prepend `update` to the window, cap it, and rewrite it. Best-effort.
    async fn remember_update(&self, key: &str, recent: Vec<ProgressUpdate>, update: &ProgressUpdate) {
        let mut window = Vec::with_capacity(recent.len() + 1);
        window.push(update.clone());
        window.extend(recent);
        window.truncate(self.config.recent_update_limit);

        let encoded = match serde_json::to_string(&window) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode recent updates");
                return;
            }
        };
        if let Err(e) = cache_call(
            self.config.io_timeout(),
            "set",
            self.cache
                .set(key, encoded, self.config.recent_update_ttl()),
        )
        .await
        {
            tracing::warn!(key, error = %e, "failed to refresh recent updates");
        }
    }

    // ── Connections ──────────────────────────────────────────────────────────

    /// Subscribe a connection to a child, confirm with `joined`, then replay
    /// the device's offline queue and send it the current progress state.
    pub async fn subscribe(
        &self,
        child_id: &str,
        device_id: &str,
        connection: ConnectionId,
        sender: EventSender,
    ) -> Result<SubscribeOutcome, SyncError> {
        let outcome = self
            .registry
            .subscribe(child_id, connection, device_id, sender)
            .await?;
        if outcome == SubscribeOutcome::ChildNotFound {
            tracing::info!(child_id, device_id, "subscribe rejected: unknown child");
            return Ok(outcome);
        }

        self.registry
            .send_to(
                connection,
                ServerEvent::Joined {
                    child_id: child_id.to_string(),
                    device_id: device_id.to_string(),
                },
            )
            .await;
        let connected_devices = self.registry.count_for(child_id).await;
        tracing::info!(
            child_id,
            device_id,
            connected_devices,
            "device joined"
        );

        self.sync_offline_updates(child_id, device_id, connection)
            .await?;
        Ok(outcome)
    }

    /// Forget a connection.
    pub async fn disconnect(&self, connection: ConnectionId) {
        if let Some((child_id, device_id)) = self.registry.unsubscribe(connection).await {
            tracing::info!(%child_id, %device_id, "device left");
        }
    }

    /// Replay the device's queued updates in enqueue order, then send the
    /// child's current progress to `connection`.
    ///
    /// On a failed replay the failing update and everything after it go
    /// back to the front of the queue and the error is returned. Returns
    /// the number of updates replayed.
    pub async fn sync_offline_updates(
        &self,
        child_id: &str,
        device_id: &str,
        connection: ConnectionId,
    ) -> Result<usize, SyncError> {
        let queued = self.offline.drain(device_id).await;
        let total = queued.len();
        let mut replayed = 0;

        let mut pending = queued.into_iter();
        while let Some(update) = pending.next() {
            if let Err(e) = self.apply_update(update.clone(), Some(connection)).await {
                let mut unreplayed = vec![update];
                unreplayed.extend(pending);
                tracing::warn!(
                    device_id,
                    replayed,
                    remaining = unreplayed.len(),
                    error = %e,
                    "offline replay interrupted"
                );
                self.offline.requeue_front(device_id, unreplayed).await;
                return Err(e);
            }
            replayed += 1;
        }
        self.offline.clear_persisted(device_id).await;

        let snapshot = self.progress_snapshot(child_id).await?;
        self.registry
            .send_to(connection, ServerEvent::ProgressState { snapshot })
            .await;

        if total > 0 {
            tracing::info!(child_id, device_id, replayed, "offline updates synced");
            self.registry
                .send_to(
                    connection,
                    ServerEvent::OfflineSyncComplete {
                        synced_updates: replayed,
                        timestamp: now_millis(),
                    },
                )
                .await;
        }
        Ok(replayed)
    }

    // ── Administrative operations ────────────────────────────────────────────

    /// Every progress row of the child.
    pub async fn progress_snapshot(&self, child_id: &str) -> Result<Vec<ProgressRecord>, SyncError> {
        Ok(store_call(
            self.config.io_timeout(),
            "find_all",
            self.store.find_all(child_id),
        )
        .await?)
    }

    pub async fn connected_devices(&self, child_id: &str) -> usize {
        self.registry.count_for(child_id).await
    }

    /// Send an ad hoc `progress-broadcast` to every device of the child,
    /// with the server time merged in as `timestamp`. Returns the number of
    /// devices reached.
    pub async fn broadcast_progress(&self, child_id: &str, mut payload: Metadata) -> usize {
        payload.insert("timestamp".to_string(), now_millis().into());
        self.registry
            .broadcast(child_id, &ServerEvent::ProgressBroadcast(payload), None)
            .await
    }

    pub async fn create_progress_backup(&self, child_id: &str) -> Result<String, SyncError> {
        self.backups.create_backup(child_id).await
    }

    pub async fn restore_progress_backup(&self, child_id: &str, backup_id: &str) -> bool {
        self.backups.restore_backup(child_id, backup_id).await
    }

    /// Hold an update for a device that is not connected. Returns the
    /// device's queue length.
    pub async fn queue_offline_update(
        &self,
        device_id: &str,
        update: ProgressUpdate,
    ) -> Result<usize, SyncError> {
        update.validate()?;
        Ok(self.offline.enqueue(device_id, update).await)
    }
}
