//! WebSocket transport: one [`Session`] per socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use lumen_sync::{Session, SyncEngine};
use tokio::sync::mpsc;

use super::state::AppState;

/// GET /ws
pub(crate) async fn handle_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| run_session(engine, socket))
}

async fn run_session(engine: Arc<SyncEngine>, mut socket: WebSocket) {
    let (outbox, mut events) = mpsc::unbounded_channel();
    let session = Session::new(engine, outbox);
    let connection = session.id();
    tracing::debug!(%connection, "websocket opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%connection, error = %e, "websocket receive failed");
                    break;
                }
            },
            Some(event) = events.recv() => {
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(%connection, event = event.name(), error = %e, "dropping unencodable event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close().await;
    tracing::debug!(%connection, "websocket closed");
}
