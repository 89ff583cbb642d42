//! Provider collaborators.
//!
//! This module defines the provider contract and its two implementations:
//! an in-memory simulated cloud and a client for a generic HTTP resource API.

mod api;
mod http;
mod simulated;

use std::sync::Arc;

use crate::config::{ProviderConfig, ProviderType};
use crate::error::Result;

pub use api::{Provider, ProviderResult, ProvisionedResource};
pub use http::HttpProvider;
pub use simulated::{Operation, ProviderCall, SimulatedProvider};

#[cfg(test)]
pub use api::MockProvider;

/// Builds the provider named by the configuration.
///
/// # Errors
///
/// Returns an error if the HTTP provider is misconfigured.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    Ok(match config.provider_type {
        ProviderType::Simulated => Arc::new(SimulatedProvider::new()),
        ProviderType::Http => Arc::new(HttpProvider::from_config(config)?),
    })
}
