//! Real-time, multi-device progress synchronization.
//!
//! A child's learning progress can be written concurrently from several
//! devices. The [`SyncEngine`] accepts each [`ProgressUpdate`], detects
//! near-simultaneous writes from other devices through a short-lived
//! recent-update window in the [`DurableCache`](lumen_storage::DurableCache),
//! resolves them with the [`ConflictResolver`], persists the result in the
//! [`ProgressStore`](lumen_storage::ProgressStore) and fans the outcome out
//! to every device subscribed to the child.
//!
//! Devices that lose their live connection hand updates to the
//! [`OfflineQueueManager`]; the queue is replayed through the normal update
//! path when the device subscribes again. The [`BackupManager`] snapshots
//! and restores a child's full progress state.

pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
mod io;
pub mod keyed_lock;
pub mod offline;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod types;

pub use backup::BackupManager;
pub use config::SyncConfig;
pub use engine::{recent_updates_key, SyncEngine, UpdateOutcome};
pub use error::SyncError;
pub use keyed_lock::KeyedLock;
pub use offline::OfflineQueueManager;
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::{ConnectionId, ConnectionRegistry, EventSender, SubscribeOutcome};
pub use resolver::ConflictResolver;
pub use session::Session;
pub use types::{
    now_millis, BackupEntry, Metadata, ProgressConflict, ProgressUpdate, ResolutionStrategy,
};
