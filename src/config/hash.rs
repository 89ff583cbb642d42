//! Attribute hashing for change summaries.
//!
//! This module provides deterministic hashing of attribute trees and whole
//! stacks. Hashes are recorded in resource state and shown in plans; the
//! differ itself compares attribute trees structurally.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::graph::canonical_string;

use super::spec::StackConfig;

/// Hasher for computing attribute and stack hashes.
#[derive(Debug, Default)]
pub struct AttributeHasher;

impl AttributeHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of an attribute tree.
    ///
    /// Object keys are written in sorted order, so two trees that differ
    /// only in key order hash identically.
    #[must_use]
    pub fn hash_value(&self, value: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical_string(value).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the whole stack configuration.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        for resource in &config.resources {
            hasher.update(resource.name.as_bytes());
            hasher.update(resource.kind.as_bytes());
            for (key, value) in &resource.attributes {
                hasher.update(key.as_bytes());
                hasher.update(canonical_string(value).as_bytes());
            }
            if let Some(count) = resource.count {
                hasher.update(count.to_be_bytes());
            }
            for value in resource.for_each.iter().flatten() {
                hasher.update(value.as_bytes());
            }
        }

        for output in &config.outputs {
            hasher.update(output.name.as_bytes());
            for source in &output.sources {
                hasher.update(source.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_hash_deterministic() {
        let hasher = AttributeHasher::new();
        let value = json!({ "cidr_block": "10.0.0.0/16" });

        assert_eq!(hasher.hash_value(&value), hasher.hash_value(&value));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let hasher = AttributeHasher::new();
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).expect("json");

        assert_eq!(hasher.hash_value(&a), hasher.hash_value(&b));
    }

    #[test]
    fn test_list_order_matters() {
        let hasher = AttributeHasher::new();
        let a = json!([1, 2]);
        let b = json!([2, 1]);

        assert_ne!(hasher.hash_value(&a), hasher.hash_value(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = AttributeHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(AttributeHasher::hashes_match("abc123", "abc123"));
        assert!(!AttributeHasher::hashes_match("abc123", "abc124"));
        assert!(!AttributeHasher::hashes_match("abc123", "abc12"));
    }
}
