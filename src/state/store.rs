//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! State is keyed by logical resource name; each key is written atomically.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::ResourceState;

/// Trait for state storage backends.
///
/// A `put` for a key is visible to every later `get` of that key in the
/// same process. Writes to different keys never wait on each other; writes
/// to the same key are serialized and the last one wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the state for one resource.
    ///
    /// Returns `None` if nothing is stored under `name`.
    async fn get(&self, name: &str) -> Result<Option<ResourceState>>;

    /// Atomically replaces the state stored under `name`.
    async fn put(&self, name: &str, state: &ResourceState) -> Result<()>;

    /// Removes the state stored under `name`, if any.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Lists every stored record, sorted by name.
    async fn list(&self) -> Result<Vec<ResourceState>>;

    /// Acquires the advisory run lock.
    ///
    /// An empty `holder` generates one from the host and process.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if an unexpired lock is held.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock_info().await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
