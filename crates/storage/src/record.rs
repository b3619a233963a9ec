use serde::{Deserialize, Serialize};

/// One progress row as held by the store. Exactly one exists per
/// (child_id, activity_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub child_id: String,
    pub activity_id: String,
    /// Joined from the activity catalogue. None when the store has no title
    /// for the activity.
    pub activity_title: Option<String>,
    pub progress: f64,
    /// Unix milliseconds of the update that last wrote this row.
    pub updated_at: i64,
    /// Opaque per-row session blob. Overwritten in full on every write.
    pub session_data: serde_json::Value,
}

/// The mutable part of a progress row, as passed to `ProgressStore::upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressWrite {
    pub progress: f64,
    /// Unix milliseconds.
    pub updated_at: i64,
    pub session_data: serde_json::Value,
}
