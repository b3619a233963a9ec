//! Point-in-time snapshots of a child's progress, held in the Durable
//! Cache.

use std::sync::Arc;
use std::time::Duration;

use lumen_storage::{DurableCache, ProgressStore, ProgressWrite};

use crate::error::SyncError;
use crate::io::{cache_call, store_call};
use crate::types::{now_millis, BackupEntry};

/// Backup id for a child at a given instant.
pub fn backup_id(child_id: &str, unix_millis: i64) -> String {
    format!("backup_{child_id}_{unix_millis}")
}

/// Cache key holding the snapshot for `backup_id`.
pub fn backup_key(backup_id: &str) -> String {
    format!("progress_backup:{backup_id}")
}

pub struct BackupManager {
    store: Arc<dyn ProgressStore>,
    cache: Arc<dyn DurableCache>,
    ttl: Duration,
    io_timeout: Duration,
}

impl BackupManager {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        cache: Arc<dyn DurableCache>,
        ttl: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            ttl,
            io_timeout,
        }
    }

    /// Snapshot every progress row of `child_id` and return the backup id.
    ///
    /// Store read failures and cache write failures are both returned: a
    /// backup id is only handed out for a snapshot that was written.
    pub async fn create_backup(&self, child_id: &str) -> Result<String, SyncError> {
        let rows = store_call(self.io_timeout, "find_all", self.store.find_all(child_id)).await?;
        let snapshot: Vec<BackupEntry> = rows
            .into_iter()
            .map(|row| BackupEntry {
                activity_id: row.activity_id,
                activity_title: row.activity_title,
                progress: row.progress,
                last_accessed: row.updated_at,
                session_data: row.session_data,
            })
            .collect();

        let id = backup_id(child_id, now_millis());
        let encoded = serde_json::to_string(&snapshot).map_err(|source| SyncError::Encode {
            what: "progress backup",
            source,
        })?;
        cache_call(
            self.io_timeout,
            "set",
            self.cache.set(&backup_key(&id), encoded, self.ttl),
        )
        .await?;

        tracing::info!(child_id, backup_id = %id, activities = snapshot.len(), "progress backup created");
        Ok(id)
    }

    /// Read a snapshot. None when it is missing, expired, unreadable, or
    /// the cache cannot be reached.
    pub async fn load_backup(&self, backup_id: &str) -> Option<Vec<BackupEntry>> {
        let raw = match cache_call(self.io_timeout, "get", self.cache.get(&backup_key(backup_id))).await
        {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(backup_id, error = %e, "failed to read progress backup");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(backup_id, error = %e, "progress backup is unreadable");
                None
            }
        }
    }

    /// Overwrite `child_id`'s rows with the snapshot's rows.
    ///
    /// Returns false when the backup does not exist or any upsert fails.
    /// Rows restored before a failure stay restored; there is no rollback.
    /// Restores bypass conflict detection: they are an authoritative
    /// rollback, not a device update.
    pub async fn restore_backup(&self, child_id: &str, backup_id: &str) -> bool {
        let Some(snapshot) = self.load_backup(backup_id).await else {
            tracing::info!(child_id, backup_id, "progress backup not found");
            return false;
        };

        for entry in snapshot.iter() {
            let write = ProgressWrite {
                progress: entry.progress,
                updated_at: entry.last_accessed,
                session_data: entry.session_data.clone(),
            };
            let result = store_call(
                self.io_timeout,
                "upsert",
                self.store.upsert(child_id, &entry.activity_id, write),
            )
            .await;
            if let Err(e) = result {
                tracing::error!(
                    child_id,
                    backup_id,
                    activity_id = %entry.activity_id,
                    error = %e,
                    "progress restore failed part-way"
                );
                return false;
            }
        }

        tracing::info!(child_id, backup_id, activities = snapshot.len(), "progress backup restored");
        true
    }
}
