//! ARO persistence layer
//!
//! Durable state for the Core Engine (sled) and the atomic-file stores
//! shared with the Executor. Single-writer discipline: every file store is
//! guarded by its own lock and persisted with temp + fsync + rename.

pub mod error;
pub mod events;
pub mod idempotency;
pub mod jsonfile;
pub mod model;
pub mod queue;
pub mod store;

pub use error::{StateError, StateResult};
pub use events::EventLog;
pub use idempotency::InboundIdempotencyStore;
pub use jsonfile::JsonFileStore;
pub use model::*;
pub use queue::{CommandQueue, FallbackQueue, QueueEntry};
pub use store::StateStore;
