//! In-memory state storage backend.
//!
//! Used for tests and throwaway runs. Each key owns its own slot, so a write
//! to one resource only holds the shared map long enough to find its slot.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::Result;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::ResourceState;

type Slot = Arc<Mutex<Option<ResourceState>>>;

/// Process-local state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    slots: RwLock<HashMap<String, Slot>>,
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = ResourceState>) -> Self {
        let slots = states
            .into_iter()
            .map(|state| (state.name.clone(), Arc::new(Mutex::new(Some(state)))))
            .collect();
        Self {
            slots: RwLock::new(slots),
            lock: Mutex::new(None),
        }
    }

    async fn slot(&self, name: &str) -> Option<Slot> {
        self.slots.read().await.get(name).cloned()
    }

    async fn slot_or_insert(&self, name: &str) -> Slot {
        if let Some(slot) = self.slot(name).await {
            return slot;
        }
        Arc::clone(self.slots.write().await.entry(name.to_string()).or_default())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceState>> {
        match self.slot(name).await {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, state: &ResourceState) -> Result<()> {
        let slot = self.slot_or_insert(name).await;
        *slot.lock().await = Some(state.clone());
        debug!("Stored state for {name} ({})", state.status);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.slots.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();

        let mut states = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(state) = slot.lock().await.clone() {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut current = self.lock.lock().await;
        let lock = LockInfo::take_over(current.as_ref(), holder)?;
        *current = Some(lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut current = self.lock.lock().await;
        if current.as_ref().is_some_and(|lock| lock.lock_id == lock_id) {
            *current = None;
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceStatus;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStateStore::new();
        assert!(store.get("vpc").await.expect("get").is_none());

        let state = ResourceState::new("vpc", "aws:ec2/vpc");
        store.put("vpc", &state).await.expect("put");

        let loaded = store.get("vpc").await.expect("get").expect("stored");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let store = MemoryStateStore::new();
        let mut state = ResourceState::new("vpc", "aws:ec2/vpc");
        store.put("vpc", &state).await.expect("put");
        state.mark_failed("boom");
        store.put("vpc", &state).await.expect("put");

        let loaded = store.get("vpc").await.expect("get").expect("stored");
        assert_eq!(loaded.status, ResourceStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_different_keys() {
        let store = Arc::new(MemoryStateStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let name = format!("node-{i}");
                let state = ResourceState::new(&name, "k");
                store.put(&name, &state).await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("put");
        }

        let states = store.list().await.expect("list");
        assert_eq!(states.len(), 16);
        assert!(states.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[tokio::test]
    async fn test_delete_and_lock() {
        let store = MemoryStateStore::with_states([ResourceState::new("vpc", "aws:ec2/vpc")]);
        store.delete("vpc").await.expect("delete");
        assert!(store.get("vpc").await.expect("get").is_none());

        let lock = store.acquire_lock("a").await.expect("lock");
        assert!(store.is_locked().await.expect("is_locked"));
        assert!(store.acquire_lock("b").await.is_err());
        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(!store.is_locked().await.expect("is_locked"));
    }
}
