//! S3-based state storage backend.
//!
//! Each resource is stored as its own object under `<prefix>resources/`,
//! so a `PutObject` replaces one resource atomically and writes to
//! different resources are independent. The run lock lives at
//! `<prefix>state.lock`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError, StrataError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::ResourceState;

/// Key segment for resource objects.
const RESOURCES_KEY: &str = "resources/";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

/// Normalizes a user prefix to `""` or `"a/b/"`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the object key for a resource.
    fn resource_key(&self, name: &str) -> String {
        format!("{}{RESOURCES_KEY}{name}.json", self.prefix)
    }

    /// Gets the object key for the lock.
    fn lock_key(&self) -> String {
        format!("{}{LOCK_KEY}", self.prefix)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    StrataError::State(StateError::backend(format!("Failed to read S3 object: {e}")))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StrataError::State(StateError::corrupted(format!("Invalid UTF-8 in S3 object: {e}")))
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StrataError::State(StateError::backend(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StrataError::State(StateError::backend(format!("S3 put error: {e}"))))?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StrataError::State(StateError::backend(format!("S3 delete error: {e}"))))?;

        Ok(())
    }

    /// Lists every resource object key.
    async fn list_resource_keys(&self) -> Result<Vec<String>> {
        let prefix = format!("{}{RESOURCES_KEY}", self.prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StrataError::State(StateError::backend(format!("S3 list error: {e}"))))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    /// Parses a resource object.
    fn parse_state(key: &str, content: &str) -> Result<ResourceState> {
        let state: ResourceState = serde_json::from_str(content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to parse state {key}: {e}")))
        })?;
        state.check_version()?;
        Ok(state)
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn get(&self, name: &str) -> Result<Option<ResourceState>> {
        let key = self.resource_key(name);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(content) => Self::parse_state(&key, &content).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, state: &ResourceState) -> Result<()> {
        let key = self.resource_key(name);

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StrataError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;

        self.put_object(&key, &content).await?;
        debug!("Saved state to s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let key = self.resource_key(name);
        info!("Deleting state from s3://{}/{key}", self.bucket);
        self.delete_object(&key).await
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        let mut states = Vec::new();
        for key in self.list_resource_keys().await? {
            if let Some(content) = self.get_object(&key).await? {
                states.push(Self::parse_state(&key, &content)?);
            }
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let key = self.lock_key();

        let existing = self.lock_info().await?;
        let lock_info = LockInfo::take_over(existing.as_ref(), holder)?;

        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            StrataError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        self.put_object(&key, &content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.lock_info().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.lock_key()).await?;
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
        let key = self.lock_key();

        if let Some(content) = self.get_object(&key).await? {
            let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
                StrataError::State(StateError::corrupted(format!("Failed to parse lock: {e}")))
            })?;

            return Ok(Some(lock_info));
        }

        Ok(None)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
