//! Which live connections belong to which child.
//!
//! State is process-local and rebuilt from scratch on restart: devices
//! re-subscribe when they reconnect.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lumen_storage::{ChildDirectory, StorageError};
use tokio::sync::{mpsc, RwLock};

use crate::io::store_call;
use crate::protocol::ServerEvent;

/// Outbound half of a connection. Delivery is fire-and-forget: a closed
/// receiver just means the transport has gone away.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Identifies one live connection (socket, tab, app instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of a subscribe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Joined,
    ChildNotFound,
}

struct Connection {
    child_id: String,
    device_id: String,
    sender: EventSender,
}

/// Both maps live behind one lock so they always change together.
#[derive(Default)]
struct RegistryState {
    /// child_id -> subscribed connections. Never holds an empty set.
    children: HashMap<String, HashSet<ConnectionId>>,
    /// connection -> its child, device and outbound channel.
    connections: HashMap<ConnectionId, Connection>,
}

impl RegistryState {
    /// Detach a connection from its child, dropping the child entry once
    /// its last connection is gone.
    fn detach(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&connection_id)?;
        if let Some(set) = self.children.get_mut(&connection.child_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                self.children.remove(&connection.child_id);
            }
        }
        Some(connection)
    }
}

pub struct ConnectionRegistry {
    directory: Arc<dyn ChildDirectory>,
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
    io_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(directory: Arc<dyn ChildDirectory>, io_timeout: Duration) -> Self {
        Self {
            directory,
            state: RwLock::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            io_timeout,
        }
    }

    /// Hand out a fresh connection id.
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe `connection_id` to `child_id`'s update stream.
    ///
    /// Unknown children yield `SubscribeOutcome::ChildNotFound`. A connection
    /// belongs to at most one child: subscribing it to another child moves
    /// it, and subscribing it again to the same child is a no-op beyond
    /// refreshing its device and sender.
    pub async fn subscribe(
        &self,
        child_id: &str,
        connection_id: ConnectionId,
        device_id: &str,
        sender: EventSender,
    ) -> Result<SubscribeOutcome, StorageError> {
        let exists = store_call(
            self.io_timeout,
            "child_exists",
            self.directory.child_exists(child_id),
        )
        .await?;
        if !exists {
            return Ok(SubscribeOutcome::ChildNotFound);
        }

        let mut state = self.state.write().await;
        if state
            .connections
            .get(&connection_id)
            .is_some_and(|c| c.child_id != child_id)
        {
            state.detach(connection_id);
        }
        state
            .children
            .entry(child_id.to_string())
            .or_default()
            .insert(connection_id);
        state.connections.insert(
            connection_id,
            Connection {
                child_id: child_id.to_string(),
                device_id: device_id.to_string(),
                sender,
            },
        );
        tracing::debug!(child_id, device_id, %connection_id, "connection subscribed");
        Ok(SubscribeOutcome::Joined)
    }

    /// Remove a connection. Returns the (child_id, device_id) it was
    /// subscribed with, or None for an unknown connection.
    pub async fn unsubscribe(&self, connection_id: ConnectionId) -> Option<(String, String)> {
        let connection = self.state.write().await.detach(connection_id)?;
        tracing::debug!(
            child_id = %connection.child_id,
            device_id = %connection.device_id,
            %connection_id,
            "connection unsubscribed"
        );
        Some((connection.child_id, connection.device_id))
    }

    /// Current number of connections subscribed to `child_id`.
    pub async fn count_for(&self, child_id: &str) -> usize {
        self.state
            .read()
            .await
            .children
            .get(child_id)
            .map_or(0, HashSet::len)
    }

    /// Number of children with at least one subscriber.
    pub async fn child_count(&self) -> usize {
        self.state.read().await.children.len()
    }

    pub async fn device_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|c| c.device_id.clone())
    }

    pub async fn is_subscribed(&self, child_id: &str, connection_id: ConnectionId) -> bool {
        self.state
            .read()
            .await
            .children
            .get(child_id)
            .is_some_and(|set| set.contains(&connection_id))
    }

    /// Deliver `event` to every subscriber of `child_id` except `exclude`.
    /// Returns how many deliveries were handed to a live channel.
    pub async fn broadcast(
        &self,
        child_id: &str,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;
        let Some(subscribers) = state.children.get(child_id) else {
            return 0;
        };
        let mut delivered = 0;
        for id in subscribers {
            if Some(*id) == exclude {
                continue;
            }
            if let Some(connection) = state.connections.get(id) {
                if connection.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Deliver `event` to a single connection. Returns false when the
    /// connection is unknown or its channel is closed.
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .is_some_and(|c| c.sender.send(event).is_ok())
    }
}
