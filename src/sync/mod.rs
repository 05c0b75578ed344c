//! Multi-device synchronization
//!
//! Two alternative strategies over one account's library:
//! - granular merge through the [`SyncCoordinator`], guarded by the
//!   advisory per-account lock
//! - opaque blob exchange under ETag preconditions

mod blob;
mod coordinator;
mod lock;
mod store;
mod types;

pub use blob::{new_etag, BlobRepository};
pub use coordinator::{SyncAttempt, SyncCoordinator};
pub use lock::{LockAcquisition, LockRepository};
pub use store::{SnapshotRepository, SyncRepository};
pub use types::*;
