//! Configuration validation for stack files.
//!
//! This module validates stack configurations before any graph is built,
//! ensuring names, backends, executor settings and outputs are consistent.

use crate::error::{ConfigError, Result, StrataError};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::expand::expand_resources;
use super::spec::{OutputConfig, ProviderConfig, ProviderType, StackConfig, StateBackend, StateConfig};

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found, if any.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StrataError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every validation issue without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.project.validate() {
            result.push("project", format!("Invalid project: {errors}"));
        } else if !is_valid_name(&config.project.name) {
            result.push(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.project.name
                ),
            );
        }

        if let Err(errors) = config.execution.validate() {
            result.push("execution", format!("Invalid execution settings: {errors}"));
        }
        if config.execution.initial_backoff_ms > config.execution.max_backoff_ms {
            result.push(
                "execution.initial_backoff_ms",
                String::from("Initial backoff cannot exceed max_backoff_ms"),
            );
        }

        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        let known = Self::validate_resources(config, &mut result);
        Self::validate_outputs(&config.outputs, &known, &mut result);

        result
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.push(
                        "state.bucket",
                        String::from("S3 bucket name is required when using S3 backend"),
                    );
                }
            }
            StateBackend::Memory => {
                result
                    .warnings
                    .push(String::from("state.backend: memory state is discarded after the run"));
            }
            StateBackend::Local => {}
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.provider_type == ProviderType::Http {
            match provider.endpoint.as_deref() {
                None | Some("") => result.push(
                    "provider.endpoint",
                    String::from("An endpoint is required for the http provider"),
                ),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    result.push(
                        "provider.endpoint",
                        format!("Endpoint '{url}' must start with http:// or https://"),
                    );
                }
                Some(_) => {}
            }
        }
        if provider.timeout_secs == 0 {
            result.push("provider.timeout_secs", String::from("Timeout must be at least 1 second"));
        }
    }

    /// Validates resource declarations and returns the names outputs may use.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) -> HashSet<String> {
        let mut known = HashSet::new();

        if config.resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
            return known;
        }

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_name(&resource.name) {
                result.push(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name
                    ),
                );
            }

            if resource.kind.trim().is_empty() {
                result.push(format!("{prefix}.kind"), String::from("Resource kind cannot be empty"));
            }

            if resource.count == Some(0) || resource.for_each.as_ref().is_some_and(Vec::is_empty) {
                result.warnings.push(format!(
                    "{prefix}: '{}' expands to zero resources",
                    resource.name
                ));
            }
        }

        match expand_resources(&config.resources) {
            Ok(expanded) => {
                let mut seen = HashSet::new();
                for resource in &expanded.resources {
                    if !seen.insert(resource.name.clone()) {
                        result.push(
                            format!("resources.{}", resource.name),
                            format!("Duplicate resource name: {}", resource.name),
                        );
                    }
                }
                known.extend(seen);
                known.extend(expanded.groups.into_keys().map(|g| format!("{g}[*]")));
            }
            Err(e) => result.push("resources", e.to_string()),
        }

        known
    }

    /// Validates output declarations.
    fn validate_outputs(outputs: &[OutputConfig], known: &HashSet<String>, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, output) in outputs.iter().enumerate() {
            let prefix = format!("outputs[{i}]");

            if !seen.insert(&output.name) {
                result.push(format!("{prefix}.name"), format!("Duplicate output name: {}", output.name));
            }

            if output.sources.is_empty() {
                result.push(format!("{prefix}.sources"), String::from("Output needs at least one source"));
            }

            for (j, source) in output.sources.iter().enumerate() {
                match source.split_once('.') {
                    Some((target, path)) if !path.is_empty() => {
                        if !known.contains(target) {
                            result.push(
                                format!("{prefix}.sources[{j}]"),
                                format!("Output source '{source}' names unknown resource '{target}'"),
                            );
                        }
                    }
                    _ => result.push(
                        format!("{prefix}.sources[{j}]"),
                        format!("Output source '{source}' must look like resource.attribute"),
                    ),
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Records an error for a field.
    fn push(&mut self, field: impl Into<String>, message: String) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message,
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
