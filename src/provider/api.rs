//! Provider collaborator contract.
//!
//! The executor drives every resource change through a [`Provider`]. Each
//! call fails with a tagged [`ProviderError`]: transient errors are retried,
//! permanent errors fail the resource immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A resource the provider has just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Attributes as the provider reports them.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Capability provider for resource CRUD.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource of `kind` with fully resolved attributes.
    async fn create(&self, kind: &str, attributes: &Value) -> ProviderResult<ProvisionedResource>;

    /// Replaces the attributes of an existing resource.
    async fn update(&self, kind: &str, id: &str, attributes: &Value) -> ProviderResult<Map<String, Value>>;

    /// Deletes a resource. Deleting a resource that is already gone succeeds.
    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()>;

    /// Gets the provider type name.
    fn provider_type(&self) -> &'static str;
}
