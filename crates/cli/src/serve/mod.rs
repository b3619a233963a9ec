//! `lumen serve` -- real-time progress sync server.
//!
//! Hosts one [`SyncEngine`] over in-memory backends and exposes it through
//! a WebSocket endpoint for devices and a small JSON API for the
//! surrounding application.
//!
//! Security features:
//! - CORS headers on all responses (permissive)
//! - Per-IP rate limiting (default: 120 req/min, configurable)
//! - Optional API key authentication via `LUMEN_API_KEY`
//!
//! Endpoints:
//! - GET  /health                                     - Server status (exempt from auth)
//! - GET  /ws                                         - WebSocket upgrade (exempt from auth)
//! - GET  /children/{child_id}/devices                - Connected device count
//! - GET  /children/{child_id}/progress               - Current progress snapshot
//! - POST /children/{child_id}/backups                - Create a progress backup
//! - POST /children/{child_id}/backups/{id}/restore   - Restore a progress backup
//! - POST /children/{child_id}/broadcast              - Ad hoc broadcast to the child's devices
//! - POST /devices/{device_id}/offline-queue          - Queue an update for an offline device

mod handlers;
mod middleware;
mod socket;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use lumen_storage::{ChildDirectory, MemoryCache, MemoryChildDirectory, MemoryProgressStore};
use lumen_sync::SyncEngine;
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_broadcast, handle_connected_devices, handle_create_backup, handle_health,
    handle_not_found, handle_progress, handle_queue_offline, handle_restore_backup,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::socket::handle_ws;
use self::state::{AppState, RateLimiter};
use crate::config::ServeConfig;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ws", get(handle_ws))
        .route("/children/{child_id}/devices", get(handle_connected_devices))
        .route("/children/{child_id}/progress", get(handle_progress))
        .route("/children/{child_id}/backups", post(handle_create_backup))
        .route(
            "/children/{child_id}/backups/{backup_id}/restore",
            post(handle_restore_backup),
        )
        .route("/children/{child_id}/broadcast", post(handle_broadcast))
        .route("/devices/{device_id}/offline-queue", post(handle_queue_offline))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the server and run until Ctrl+C.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: ServeConfig,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let directory: Arc<dyn ChildDirectory> = if config.children.is_empty() {
        tracing::info!("accepting subscriptions for any child");
        Arc::new(MemoryChildDirectory::open())
    } else {
        tracing::info!(children = config.children.len(), "accepting subscriptions for known children");
        Arc::new(MemoryChildDirectory::new(config.children.iter().cloned()))
    };

    let engine = SyncEngine::new(
        Arc::new(MemoryProgressStore::new()),
        Arc::new(MemoryCache::new()),
        directory,
        config.sync.clone(),
    );

    if config.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    tracing::info!(
        rate_limit = config.rate_limit,
        conflict_window_ms = config.sync.conflict_window_ms,
        strategy = %config.sync.resolution_strategy,
        "sync engine ready"
    );

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        rate_limiter: RateLimiter::new(config.rate_limit),
        api_key: config.api_key.clone(),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.bind, config.port);

    // TLS support via axum-server + rustls (requires `tls` feature)
    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: std::net::SocketAddr = addr.parse()?;
        tracing::info!("lumen listening on https://{}", addr);
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("lumen listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
