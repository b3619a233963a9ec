//! Administrative HTTP handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lumen_storage::{CacheError, StorageError};
use lumen_sync::{Metadata, ProgressUpdate, SyncError};
use serde_json::json;

use super::json_error;
use super::state::AppState;

/// Map an engine failure onto a status code and JSON error body.
fn sync_error(context: &str, err: &SyncError) -> Response {
    let status = match err {
        SyncError::InvalidUpdate(_) => StatusCode::BAD_REQUEST,
        SyncError::Storage(StorageError::Timeout { .. })
        | SyncError::Cache(CacheError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        SyncError::Storage(_) | SyncError::Cache(_) | SyncError::Encode { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "{}", context);
    }
    json_error(status, &format!("{}: {}", context, err)).into_response()
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeChildren": state.engine.registry().child_count().await,
    });
    (StatusCode::OK, Json(response))
}

/// GET /children/{child_id}/devices
pub(crate) async fn handle_connected_devices(
    State(state): State<Arc<AppState>>,
    Path(child_id): Path<String>,
) -> impl IntoResponse {
    let connected = state.engine.connected_devices(&child_id).await;
    Json(json!({ "childId": child_id, "connectedDevices": connected }))
}

/// GET /children/{child_id}/progress
pub(crate) async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path(child_id): Path<String>,
) -> Response {
    match state.engine.progress_snapshot(&child_id).await {
        Ok(snapshot) => Json(json!({ "childId": child_id, "snapshot": snapshot })).into_response(),
        Err(e) => sync_error("failed to read progress", &e),
    }
}

/// POST /children/{child_id}/backups
pub(crate) async fn handle_create_backup(
    State(state): State<Arc<AppState>>,
    Path(child_id): Path<String>,
) -> Response {
    match state.engine.create_progress_backup(&child_id).await {
        Ok(backup_id) => {
            (StatusCode::CREATED, Json(json!({ "backupId": backup_id }))).into_response()
        }
        Err(e) => sync_error("failed to create backup", &e),
    }
}

/// POST /children/{child_id}/backups/{backup_id}/restore
pub(crate) async fn handle_restore_backup(
    State(state): State<Arc<AppState>>,
    Path((child_id, backup_id)): Path<(String, String)>,
) -> Response {
    if state.engine.backups().load_backup(&backup_id).await.is_none() {
        let body = json!({
            "restored": false,
            "error": format!("backup '{}' not found", backup_id),
        });
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }

    if state
        .engine
        .restore_progress_backup(&child_id, &backup_id)
        .await
    {
        Json(json!({ "restored": true })).into_response()
    } else {
        let body = json!({ "restored": false, "error": "failed to restore backup" });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// POST /children/{child_id}/broadcast
pub(crate) async fn handle_broadcast(
    State(state): State<Arc<AppState>>,
    Path(child_id): Path<String>,
    Json(payload): Json<Metadata>,
) -> impl IntoResponse {
    let delivered = state.engine.broadcast_progress(&child_id, payload).await;
    Json(json!({ "delivered": delivered }))
}

/// POST /devices/{device_id}/offline-queue
pub(crate) async fn handle_queue_offline(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> Response {
    match state.engine.queue_offline_update(&device_id, update).await {
        Ok(queued) => (
            StatusCode::ACCEPTED,
            Json(json!({ "deviceId": device_id, "queued": queued })),
        )
            .into_response(),
        Err(e) => sync_error("failed to queue update", &e),
    }
}
