// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Strata
//!
//! A declarative resource reconciliation engine.
//!
//! ## Overview
//!
//! Strata reads a stack of resource declarations, compares them with the
//! last-known state of each resource, and drives a provider until the two
//! agree:
//!
//! - Resources reference each other with `{$ref: "name.attribute"}`
//! - References become dependency edges; cycles are rejected up front
//! - Independent resources are created, updated and deleted in parallel
//! - Transient provider errors are retried with exponential backoff
//! - A failed resource skips its dependents and nothing else
//! - State is written per resource, so a crashed run resumes cleanly
//!
//! ## Architecture
//!
//! 1. **Desired state**: declared in `strata.yaml`, expanded and turned into
//!    a [`graph::ResourceGraph`]
//! 2. **Stored state**: one [`state::ResourceState`] per resource in a
//!    [`state::StateStore`]
//! 3. **Plan**: the [`planner::Differ`] compares the two
//! 4. **Execution**: the [`planner::Executor`] walks the plan against a
//!    [`provider::Provider`]
//!
//! ## Modules
//!
//! - [`config`]: Stack parsing, validation and expansion
//! - [`graph`]: Attribute values, references and the resource graph
//! - [`state`]: State storage backends (local, memory, S3) and the run lock
//! - [`provider`]: Provider contract, simulated cloud and HTTP client
//! - [`planner`]: Diffing, plans, retries and the parallel executor
//! - [`outputs`]: Output export from finalized state
//! - [`reconciler`]: Ties the above into plan / apply / destroy
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: network
//!
//! resources:
//!   - name: vpc
//!     kind: aws:ec2/vpc
//!     attributes:
//!       cidr_block: 10.0.0.0/16
//!   - name: subnet
//!     kind: aws:ec2/subnet
//!     attributes:
//!       vpc_id: { $ref: vpc.id }
//!       cidr_block: 10.0.1.0/24
//!
//! outputs:
//!   - name: vpc_id
//!     sources: [vpc.id]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{AttributeHasher, ConfigParser, ConfigValidator, StackConfig};
pub use error::{Result, StrataError};
pub use graph::{Attr, GraphBuilder, Reference, ResourceGraph};
pub use outputs::{OutputExporter, OutputValue};
pub use planner::{Differ, ExecutionReport, Executor, Plan};
pub use provider::{Provider, SimulatedProvider};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, MemoryStateStore, ResourceState, S3StateStore, StateStore};
