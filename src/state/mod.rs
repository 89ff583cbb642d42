//! State management module.
//!
//! This module persists the last-known state of every reconciled resource,
//! keyed by logical name, and provides the advisory run lock.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{ResourceState, ResourceStatus, STATE_VERSION};
