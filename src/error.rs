//! Error types for the Strata reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, state storage, provider calls,
//! planning, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Strata engine.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Execution errors.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required setting is absent.
    #[error("Missing required setting: {key}")]
    MissingConfig {
        /// Name of the missing setting.
        key: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of item (resource, output).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Resource graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An attribute references a resource that is not declared.
    #[error("Resource '{resource}' references unknown resource '{target}' in attribute '{attribute}'")]
    UnknownReference {
        /// Resource holding the reference.
        resource: String,
        /// Attribute containing the reference.
        attribute: String,
        /// The missing logical name.
        target: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A reference expression is malformed.
    #[error("Invalid reference '{expression}' in resource '{resource}': {reason}")]
    InvalidReference {
        /// Resource holding the reference.
        resource: String,
        /// The malformed expression.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Storage backend error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors reported by a provider collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Retryable failure (throttling, timeouts, server errors).
    #[error("transient provider error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Delay suggested by the provider before retrying.
        retry_after_ms: Option<u64>,
    },

    /// Non-retryable failure (validation, permission denial).
    #[error("permanent provider error: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan references a node it does not contain.
    #[error("Plan action '{action}' depends on unknown node '{dependency}'")]
    UnknownDependency {
        /// Action holding the dependency.
        action: String,
        /// The missing node.
        dependency: String,
    },

    /// Stored state contains a dependency cycle among resources to delete.
    #[error("Stored dependencies form a cycle: {}", cycle.join(" -> "))]
    StoredCycle {
        /// Names along the cycle.
        cycle: Vec<String>,
    },

    /// Stored state changed between planning and taking the lock.
    #[error("State changed since the plan was computed; run plan again")]
    StaleState,
}

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Transient failures persisted past the attempt limit.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// The final provider error.
        last_error: ProviderError,
    },

    /// A node was not attempted because a dependency failed.
    #[error("Skipped {resource}: dependency '{dependency}' failed")]
    SkippedDueToDependencyFailure {
        /// Resource that was skipped.
        resource: String,
        /// The failed dependency.
        dependency: String,
    },

    /// A reference could not be resolved against dependency state.
    #[error("Unresolved reference {reference} in {resource}")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// The reference expression.
        reference: String,
    },

    /// A create was planned for a resource that state already records.
    #[error("Refusing to create {resource}: state already records it as {id}")]
    AlreadyExists {
        /// Resource the create was planned for.
        resource: String,
        /// Identifier found in state.
        id: String,
    },

    /// One or more nodes ended in the failed state.
    #[error("{failed} resource(s) failed to reconcile")]
    RunFailed {
        /// Number of failed nodes.
        failed: usize,
    },

    /// The run was cancelled before every node was dispatched.
    #[error("Run cancelled with {pending} resource(s) not started")]
    Cancelled {
        /// Number of nodes never dispatched.
        pending: usize,
    },
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Transient { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in milliseconds, if applicable.
    #[must_use]
    pub const fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::Transient { retry_after_ms, .. }) => *retry_after_ms,
            Self::State(StateError::LockFailed { .. }) => Some(2000),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a retry hint.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
