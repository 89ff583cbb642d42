//! Configuration specification types for the engine.
//!
//! This module defines all the structs that map to the `strata.yaml` file.
//! These types are declarative and fully describe the desired stack.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use validator::Validate;

/// The root configuration structure for a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider collaborator configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Executor tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Stack settings (required keys and values).
    #[serde(default)]
    pub settings: SettingsConfig,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProjectConfig {
    /// Unique name for the project.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    #[validate(length(min = 1, max = 32))]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// One JSON file per resource in a local directory.
    #[default]
    Local,
    /// Process-local memory (nothing survives the run).
    Memory,
    /// One object per resource in an S3 bucket.
    S3,
}

/// Provider collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Which provider implementation to use.
    #[serde(rename = "type", default)]
    pub provider_type: ProviderType,
    /// Base URL for the HTTP provider.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

/// Provider implementation types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// In-memory simulated cloud.
    #[default]
    Simulated,
    /// Remote provider reached over HTTP.
    Http,
}

/// Executor tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ExecutionConfig {
    /// Maximum number of node-actions in flight.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 256))]
    pub parallelism: usize,
    /// Attempts per provider call, including the first.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Deadline for one provider call, in seconds.
    #[serde(default = "default_operation_timeout")]
    #[validate(range(min = 1))]
    pub operation_timeout_secs: u64,
}

/// Stack settings as written in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsConfig {
    /// Keys that must have a value before the graph is built.
    #[serde(default)]
    pub required: Vec<String>,
    /// Setting values.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Logical name, unique within the stack.
    pub name: String,
    /// Resource kind understood by the provider (e.g. `aws:ec2/vpc`).
    pub kind: String,
    /// Desired attributes. `{$ref: "name.path"}`, `{$set: [...]}` and
    /// `{$config: key}` have special meaning.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Expand into `count` numbered copies.
    #[serde(default)]
    pub count: Option<u32>,
    /// Expand into one copy per listed value.
    #[serde(default)]
    pub for_each: Option<Vec<String>>,
}

/// A declared output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Output name.
    pub name: String,
    /// Source paths (`resource.attr` or `group[*].attr`).
    pub sources: Vec<String>,
}

// Default value functions

const fn default_parallelism() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_operation_timeout() -> u64 {
    300
}

const fn default_provider_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_token_env() -> String {
    String::from("STRATA_PROVIDER_TOKEN")
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::default(),
            endpoint: None,
            token_env: default_token_env(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl StackConfig {
    /// Returns the fully qualified stack name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns declared resource names (before expansion).
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }
}

impl ResourceConfig {
    /// Creates a resource declaration with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            attributes: BTreeMap::new(),
            count: None,
            for_each: None,
        }
    }

    /// Adds a desired attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Returns true if this declaration expands into several resources.
    #[must_use]
    pub const fn is_expanded(&self) -> bool {
        self.count.is_some() || self.for_each.is_some()
    }
}
