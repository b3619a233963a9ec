pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::{CacheError, StorageError};
pub use memory::{
    MemoryCache, MemoryChildDirectory, MemoryProgressStore, DEFAULT_SWEEP_THRESHOLD,
};
pub use record::{ProgressRecord, ProgressWrite};
pub use traits::{ChildDirectory, DurableCache, ProgressStore};
