//! One live connection's view of the engine, independent of transport.
//!
//! The transport feeds inbound text frames to [`Session::handle_text`] and
//! forwards everything arriving on the session's outbound channel to the
//! device. Failures are reported to the device as `error` events.

use std::sync::Arc;

use crate::engine::SyncEngine;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionId, EventSender, SubscribeOutcome};
use crate::types::now_millis;

pub struct Session {
    engine: Arc<SyncEngine>,
    id: ConnectionId,
    outbox: EventSender,
}

impl Session {
    pub fn new(engine: Arc<SyncEngine>, outbox: EventSender) -> Self {
        let id = engine.registry().allocate_id();
        Self { engine, id, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Parse and handle one inbound frame.
    pub async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                tracing::debug!(connection = %self.id, error = %e, "rejected malformed event");
                self.reply(ServerEvent::error(format!("malformed event: {e}")));
            }
        }
    }

    pub async fn handle(&self, event: ClientEvent) {
        match event {
            ClientEvent::Subscribe(request) => {
                let result = self
                    .engine
                    .subscribe(
                        &request.child_id,
                        &request.device_id,
                        self.id,
                        self.outbox.clone(),
                    )
                    .await;
                match result {
                    Ok(SubscribeOutcome::Joined) => {}
                    Ok(SubscribeOutcome::ChildNotFound) => {
                        self.reply(ServerEvent::error(format!(
                            "child '{}' not found",
                            request.child_id
                        )));
                    }
                    Err(e) => self.reply(ServerEvent::error(format!("failed to sync: {e}"))),
                }
            }
            ClientEvent::ProgressUpdate(request) => {
                let update = request.into_update(now_millis());
                if let Err(e) = self.engine.apply_update(update, Some(self.id)).await {
                    tracing::warn!(connection = %self.id, error = %e, "progress update failed");
                    self.reply(ServerEvent::error(format!("failed to update progress: {e}")));
                }
            }
            ClientEvent::RequestSync(request) => {
                match self.engine.progress_snapshot(&request.child_id).await {
                    Ok(snapshot) => self.reply(ServerEvent::ProgressState { snapshot }),
                    Err(e) => self.reply(ServerEvent::error(format!("failed to sync: {e}"))),
                }
            }
        }
    }

    /// Unsubscribe. Call once the transport has closed.
    pub async fn close(self) {
        self.engine.disconnect(self.id).await;
    }

    fn reply(&self, event: ServerEvent) {
        // A closed outbox means the transport is already gone.
        let _ = self.outbox.send(event);
    }
}
