//! Data model shared by every component of the sync core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Open-ended side data carried through to storage and never interpreted.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// One device's view of progress on one activity. Never mutated after
/// creation except for the resolved progress substituted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub child_id: String,
    pub activity_id: String,
    pub progress: f64,
    /// Unix milliseconds, as recorded by the device or by the server at
    /// receipt.
    pub timestamp: i64,
    pub device_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl ProgressUpdate {
    /// Reject updates the engine cannot key or compare.
    ///
    /// Finite out-of-range progress values are accepted as-is.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.child_id.is_empty() {
            return Err(SyncError::InvalidUpdate("childId is empty".to_string()));
        }
        if self.activity_id.is_empty() {
            return Err(SyncError::InvalidUpdate("activityId is empty".to_string()));
        }
        if self.device_id.is_empty() {
            return Err(SyncError::InvalidUpdate("deviceId is empty".to_string()));
        }
        if !self.progress.is_finite() {
            return Err(SyncError::InvalidUpdate(format!(
                "progress must be finite, got {}",
                self.progress
            )));
        }
        Ok(())
    }

    /// The session blob written alongside the row: the update's metadata
    /// with the device, session and update time stamped over it.
    pub fn session_data(&self) -> serde_json::Value {
        let mut data = self.metadata.clone().unwrap_or_default();
        data.insert("deviceId".to_string(), self.device_id.clone().into());
        data.insert("sessionId".to_string(), self.session_id.clone().into());
        data.insert("lastUpdate".to_string(), self.timestamp.into());
        serde_json::Value::Object(data)
    }
}

/// Which rule produced a resolved progress value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// The newest contributor wins.
    Latest,
    /// The largest progress value wins.
    #[default]
    Highest,
    /// The arithmetic mean of all contributors.
    Merge,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::Latest => "latest",
            ResolutionStrategy::Highest => "highest",
            ResolutionStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(ResolutionStrategy::Latest),
            "highest" => Ok(ResolutionStrategy::Highest),
            "merge" => Ok(ResolutionStrategy::Merge),
            other => Err(format!("unknown resolution strategy '{}'", other)),
        }
    }
}

/// Resolution outcome for one (child, activity) pair. Computed, persisted
/// and broadcast by the engine, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressConflict {
    pub child_id: String,
    pub activity_id: String,
    /// Every contributing update, newest first.
    pub conflicts: Vec<ProgressUpdate>,
    pub resolved_progress: f64,
    pub resolution_strategy: ResolutionStrategy,
}

impl ProgressConflict {
    /// The newest contributor.
    pub fn latest(&self) -> &ProgressUpdate {
        &self.conflicts[0]
    }

    /// Device ids of all contributors, newest first.
    pub fn devices(&self) -> Vec<&str> {
        self.conflicts.iter().map(|u| u.device_id.as_str()).collect()
    }
}

/// One activity row inside a backup snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub activity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_title: Option<String>,
    pub progress: f64,
    /// The row's `updated_at` at backup time, unix milliseconds.
    pub last_accessed: i64,
    pub session_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> ProgressUpdate {
        ProgressUpdate {
            child_id: "child-1".to_string(),
            activity_id: "math-1".to_string(),
            progress: 50.0,
            timestamp: 1_000,
            device_id: "tablet".to_string(),
            session_id: "s-1".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn session_data_stamps_device_over_metadata() {
        let mut u = update();
        let mut metadata = Metadata::new();
        metadata.insert("hints".to_string(), 2.into());
        metadata.insert("deviceId".to_string(), "spoofed".into());
        u.metadata = Some(metadata);

        let data = u.session_data();
        assert_eq!(data["hints"], 2);
        assert_eq!(data["deviceId"], "tablet");
        assert_eq!(data["sessionId"], "s-1");
        assert_eq!(data["lastUpdate"], 1_000);
    }

    #[test]
    fn validate_rejects_missing_ids_and_nan() {
        let mut u = update();
        u.child_id.clear();
        assert!(matches!(u.validate(), Err(SyncError::InvalidUpdate(_))));

        let mut u = update();
        u.progress = f64::NAN;
        assert!(matches!(u.validate(), Err(SyncError::InvalidUpdate(_))));
    }

    #[test]
    fn validate_accepts_out_of_range_progress() {
        let mut u = update();
        u.progress = 250.0;
        assert!(u.validate().is_ok());
        u.progress = -5.0;
        assert!(u.validate().is_ok());
    }

    #[test]
    fn update_wire_format_is_camel_case() {
        let json = serde_json::to_value(update()).unwrap();
        assert_eq!(json["childId"], "child-1");
        assert_eq!(json["deviceId"], "tablet");
        assert!(json.get("metadata").is_none());

        let parsed: ProgressUpdate = serde_json::from_value(serde_json::json!({
            "childId": "c", "activityId": "a", "progress": 1.5,
            "timestamp": 7, "deviceId": "d"
        }))
        .unwrap();
        assert_eq!(parsed.session_id, "");
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!(
            "Highest".parse::<ResolutionStrategy>(),
            Ok(ResolutionStrategy::Highest)
        );
        assert!("newest".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::default().to_string(), "highest");
    }
}
