//! Local file-based state storage backend.
//!
//! Each resource is stored as `<dir>/resources/<name>.json`, written to a
//! temporary file and renamed into place. Writes are serialized per key, so
//! different resources can be saved at the same time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, StrataError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::ResourceState;

/// Default state directory name.
pub const STATE_DIR: &str = ".strata";

/// Directory holding one file per resource.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Directory holding resource files.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Per-key write guards.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalStateStore {
    /// Creates a store under `.strata` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StrataError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let resources_dir = base_dir.join(RESOURCES_DIR);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            resources_dir,
            lock_path,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the file path for a resource.
    fn resource_path(&self, name: &str) -> Result<PathBuf> {
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !safe {
            return Err(StrataError::State(StateError::backend(format!(
                "Resource name '{name}' cannot be used as a state file name"
            ))));
        }
        Ok(self.resources_dir.join(format!("{name}.json")))
    }

    /// Returns the write guard for a key.
    async fn key_lock(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.key_locks.lock().await.entry(name.to_string()).or_default())
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                StrataError::State(StateError::backend(format!("Failed to create state directory: {e}")))
            })?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a temporary file and a rename.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to create temp state file: {e}")))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to sync state file: {e}")))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to rename state file: {e}")))
        })?;

        Ok(())
    }

    /// Reads and parses one resource file.
    async fn read_state(path: &Path) -> Result<ResourceState> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            StrataError::State(StateError::corrupted(format!(
                "Failed to read state file {}: {e}",
                path.display()
            )))
        })?;

        let state: ResourceState = serde_json::from_str(&content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!(
                "Failed to parse state file {}: {e}",
                path.display()
            )))
        })?;

        state.check_version()?;
        Ok(state)
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to read lock file: {e}")))
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        Self::ensure_dir(&self.base_dir).await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            StrataError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            StrataError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StrataError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            StrataError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                StrataError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceState>> {
        let path = self.resource_path(name)?;
        if !path.exists() {
            debug!("No state file for {name}");
            return Ok(None);
        }

        let guard = self.key_lock(name).await;
        let _held = guard.lock().await;
        Self::read_state(&path).await.map(Some)
    }

    async fn put(&self, name: &str, state: &ResourceState) -> Result<()> {
        let path = self.resource_path(name)?;
        Self::ensure_dir(&self.resources_dir).await?;

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StrataError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;

        let guard = self.key_lock(name).await;
        let _held = guard.lock().await;
        Self::write_atomic(&path, &content).await?;

        debug!("Saved state for {name} to {}", path.display());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resource_path(name)?;

        let guard = self.key_lock(name).await;
        let _held = guard.lock().await;
        if path.exists() {
            info!("Deleting state file: {}", path.display());
            fs::remove_file(&path).await.map_err(|e| {
                StrataError::State(StateError::backend(format!("Failed to delete state file: {e}")))
            })?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        if !self.resources_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.resources_dir).await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to read state directory: {e}")))
        })?;

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StrataError::State(StateError::backend(format!("Failed to read state directory: {e}")))
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                states.push(Self::read_state(&path).await?);
            }
        }

        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let existing = self.read_lock_file().await?;
        let lock_info = LockInfo::take_over(existing.as_ref(), holder)?;
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
