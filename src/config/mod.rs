//! Configuration module for the Strata engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `strata.yaml`
//! - Validation of configuration values
//! - Expansion of `count` / `for_each` resources
//! - The enumerated settings object consumed by the graph builder
//! - Attribute hashing for change summaries

mod spec;
mod parser;
mod validation;
mod expand;
mod settings;
mod hash;

pub use spec::{
    ExecutionConfig, OutputConfig, ProjectConfig, ProviderConfig, ProviderType, ResourceConfig,
    SettingsConfig, StackConfig, StateBackend, StateConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validation::{ConfigValidator, ValidationIssue, ValidationResult};
pub use expand::{ExpandedStack, expand_resources};
pub use settings::Settings;
pub use hash::AttributeHasher;
