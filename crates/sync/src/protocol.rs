//! Realtime wire protocol.
//!
//! Every message is a JSON object `{"event": "<name>", "data": {...}}`
//! with camelCase fields, independent of the transport carrying it.

use lumen_storage::ProgressRecord;
use serde::{Deserialize, Serialize};

use crate::types::{Metadata, ProgressUpdate, ResolutionStrategy};

/// Events a device sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Subscribe(SubscribeRequest),
    ProgressUpdate(ProgressUpdateRequest),
    RequestSync(SyncRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub child_id: String,
    pub device_id: String,
    #[serde(default)]
    pub session_id: String,
}

/// A progress update as sent by a device. The timestamp is optional; the
/// server stamps its receipt time when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRequest {
    pub child_id: String,
    pub activity_id: String,
    pub progress: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub device_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl ProgressUpdateRequest {
    pub fn into_update(self, received_at: i64) -> ProgressUpdate {
        ProgressUpdate {
            child_id: self.child_id,
            activity_id: self.activity_id,
            progress: self.progress,
            timestamp: self.timestamp.unwrap_or(received_at),
            device_id: self.device_id,
            session_id: self.session_id,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub child_id: String,
    pub device_id: String,
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Joined { child_id: String, device_id: String },

    /// A non-conflicting update, sent to every other device of the child.
    #[serde(rename_all = "camelCase")]
    ProgressUpdated {
        child_id: String,
        activity_id: String,
        progress: f64,
        timestamp: i64,
        device_id: String,
        metadata: Option<Metadata>,
    },

    /// A conflict outcome, sent to every device of the child.
    #[serde(rename_all = "camelCase")]
    ProgressResolved {
        child_id: String,
        activity_id: String,
        resolved_progress: f64,
        resolution_strategy: ResolutionStrategy,
        timestamp: i64,
    },

    /// Full current progress of the child.
    ProgressState { snapshot: Vec<ProgressRecord> },

    #[serde(rename_all = "camelCase")]
    OfflineSyncComplete { synced_updates: usize, timestamp: i64 },

    /// Parent-initiated payload, passed through with a server timestamp.
    ProgressBroadcast(Metadata),

    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::ProgressUpdated { .. } => "progress-updated",
            ServerEvent::ProgressResolved { .. } => "progress-resolved",
            ServerEvent::ProgressState { .. } => "progress-state",
            ServerEvent::OfflineSyncComplete { .. } => "offline-sync-complete",
            ServerEvent::ProgressBroadcast(_) => "progress-broadcast",
            ServerEvent::Error { .. } => "error",
        }
    }
}
