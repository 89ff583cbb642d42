//! Expansion of `count` and `for_each` resource declarations.
//!
//! A declaration named `instance` with three entries becomes `instance-0`,
//! `instance-1` and `instance-2`. String values anywhere in the attribute
//! tree (references included) have `${each.index}` and `${each.value}`
//! substituted per copy.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ConfigError;

use super::spec::ResourceConfig;

/// Placeholder replaced by the zero-based copy index.
const INDEX_TOKEN: &str = "${each.index}";

/// Placeholder replaced by the `for_each` value (or the index for `count`).
const VALUE_TOKEN: &str = "${each.value}";

/// Resources after expansion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedStack {
    /// Concrete resources in declaration order.
    pub resources: Vec<ResourceConfig>,
    /// Expanded groups: declared name to member names, in index order.
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Expands every `count` / `for_each` declaration.
///
/// # Errors
///
/// Returns an error if a declaration sets both `count` and `for_each`.
pub fn expand_resources(resources: &[ResourceConfig]) -> Result<ExpandedStack, ConfigError> {
    let mut expanded = ExpandedStack::default();

    for resource in resources {
        let values: Vec<String> = match (&resource.count, &resource.for_each) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::validation(
                    format!("Resource '{}' sets both count and for_each", resource.name),
                    format!("resources.{}", resource.name),
                ));
            }
            (Some(count), None) => (0..*count).map(|i| i.to_string()).collect(),
            (None, Some(values)) => values.clone(),
            (None, None) => {
                expanded.resources.push(resource.clone());
                continue;
            }
        };

        let mut members = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            let name = format!("{}-{index}", resource.name);
            let attributes = resource
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, index, value)))
                .collect();

            expanded.resources.push(ResourceConfig {
                name: name.clone(),
                kind: resource.kind.clone(),
                attributes,
                count: None,
                for_each: None,
            });
            members.push(name);
        }

        debug!("Expanded {} into {} resources", resource.name, members.len());
        expanded.groups.insert(resource.name.clone(), members);
    }

    Ok(expanded)
}

/// Substitutes the per-copy placeholders inside a value tree.
fn substitute(value: &Value, index: usize, each: &str) -> Value {
    match value {
        Value::String(s) => Value::String(
            s.replace(INDEX_TOKEN, &index.to_string())
                .replace(VALUE_TOKEN, each),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, index, each)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, index, each)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_resources_pass_through() {
        let res = ResourceConfig::new("vpc", "aws:ec2/vpc");
        let expanded = expand_resources(std::slice::from_ref(&res)).expect("expands");
        assert_eq!(expanded.resources, vec![res]);
        assert!(expanded.groups.is_empty());
    }

    #[test]
    fn test_for_each_substitutes_tokens() {
        let mut res = ResourceConfig::new("instance", "aws:ec2/instance")
            .with_attribute("tags", json!({ "Name": "${each.value}" }))
            .with_attribute("subnet_id", json!({ "$ref": "subnet.id" }));
        res.for_each = Some(vec![
            String::from("control-plane-1"),
            String::from("worker-1"),
        ]);

        let expanded = expand_resources(&[res]).expect("expands");
        assert_eq!(expanded.resources.len(), 2);
        assert_eq!(expanded.resources[0].name, "instance-0");
        assert_eq!(expanded.resources[1].name, "instance-1");
        assert_eq!(expanded.resources[1].attributes["tags"], json!({ "Name": "worker-1" }));
        assert_eq!(
            expanded.groups["instance"],
            vec![String::from("instance-0"), String::from("instance-1")]
        );
    }

    #[test]
    fn test_count_uses_index() {
        let mut res = ResourceConfig::new("subnet", "aws:ec2/subnet")
            .with_attribute("cidr_block", json!("10.0.${each.index}.0/24"));
        res.count = Some(3);

        let expanded = expand_resources(&[res]).expect("expands");
        assert_eq!(expanded.resources[2].attributes["cidr_block"], json!("10.0.2.0/24"));
    }

    #[test]
    fn test_count_and_for_each_conflict() {
        let mut res = ResourceConfig::new("x", "k");
        res.count = Some(1);
        res.for_each = Some(vec![String::from("a")]);
        assert!(expand_resources(&[res]).is_err());
    }
}
