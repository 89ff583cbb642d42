//! State types for tracking reconciled resources.
//!
//! A [`ResourceState`] is the last-known record of one logical resource:
//! the attributes that were last applied, the identifier the provider
//! assigned, the attributes the provider reported back, and a status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StateError;

/// Current version of the per-resource state format.
pub const STATE_VERSION: &str = "1";

/// Recorded state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// State format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Provider-assigned identifier, once one exists.
    #[serde(default)]
    pub id: Option<String>,
    /// Last-applied attributes, in symbolic form.
    #[serde(default = "empty_object")]
    pub attributes: Value,
    /// Attributes reported by the provider after the last success.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Logical names this resource read outputs from when last applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Current status.
    pub status: ResourceStatus,
    /// Hash of the last-applied attributes.
    #[serde(default)]
    pub attributes_hash: String,
    /// Last error message, if the most recent attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Resource status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Record written, provider call not completed.
    #[default]
    Pending,
    /// Provider call succeeded.
    Created,
    /// Last provider call failed.
    Failed,
    /// Resource removed from the provider.
    Deleted,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

fn default_version() -> String {
    String::from(STATE_VERSION)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ResourceState {
    /// Creates a pending record with no identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: default_version(),
            name: name.into(),
            kind: kind.into(),
            id: None,
            attributes: empty_object(),
            outputs: Map::new(),
            dependencies: Vec::new(),
            status: ResourceStatus::Pending,
            attributes_hash: String::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a successful create or update.
    pub fn mark_created(
        &mut self,
        id: String,
        attributes: Value,
        attributes_hash: String,
        outputs: Map<String, Value>,
        dependencies: Vec<String>,
    ) {
        self.id = Some(id);
        self.attributes = attributes;
        self.attributes_hash = attributes_hash;
        self.outputs = outputs;
        self.dependencies = dependencies;
        self.status = ResourceStatus::Created;
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Records a failed provider call. Identifier and outputs are kept.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ResourceStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Records a successful delete.
    pub fn mark_deleted(&mut self) {
        self.status = ResourceStatus::Deleted;
        self.outputs.clear();
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Returns true unless the record is a deletion tombstone.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != ResourceStatus::Deleted
    }

    /// Reads an attribute path off this resource.
    ///
    /// `id` names the provider identifier; any other path walks the
    /// provider-reported attributes by object key or list index.
    #[must_use]
    pub fn lookup(&self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;

        if first == "id"
            && rest.is_empty()
            && let Some(id) = &self.id
        {
            return Some(Value::String(id.clone()));
        }

        let mut current = self.outputs.get(first)?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Rejects records written by an incompatible format version.
    ///
    /// # Errors
    ///
    /// Returns a version mismatch error.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: String::from(STATE_VERSION),
                found: self.version.clone(),
            })
        }
    }
}
