//! Enumerated stack settings.
//!
//! Settings replace ambient global configuration lookups: the graph builder
//! receives a [`Settings`] value and resolves `{$config: key}` attributes
//! through it, failing with a missing-config error when a key is absent.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConfigError;

use super::spec::SettingsConfig;

/// Settings passed into the graph builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Known setting values.
    values: BTreeMap<String, String>,
    /// Keys that must be present.
    required: BTreeSet<String>,
}

impl Settings {
    /// Creates an empty settings object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from the configuration section.
    #[must_use]
    pub fn from_config(config: &SettingsConfig) -> Self {
        Self {
            values: config.values.clone(),
            required: config.required.iter().cloned().collect(),
        }
    }

    /// Adds or replaces a value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Marks a key as required.
    #[must_use]
    pub fn with_required(mut self, key: impl Into<String>) -> Self {
        self.required.insert(key.into());
        self
    }

    /// Returns a value if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns a value or fails with [`ConfigError::MissingConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key has no value.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Checks that every required key has a value.
    ///
    /// # Errors
    ///
    /// Returns the first missing key, in sorted order.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        for key in &self.required {
            self.require(key)?;
        }
        Ok(())
    }

    /// Returns the known keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
