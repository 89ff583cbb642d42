//! Resource graph module.
//!
//! This module holds the attribute model (values, sets and references) and
//! the builder that turns declared resources into an acyclic dependency graph.

mod builder;
mod value;

pub use builder::{GraphBuilder, ResourceGraph, ResourceNode, ResourceSpec};
pub use value::{Attr, CONFIG_KEY, REF_KEY, Reference, SET_KEY, canonical_string};
