//! Attribute values and cross-resource references.
//!
//! Desired attributes are held as an [`Attr`] tree. Three object forms are
//! special in configuration:
//!
//! - `{ $ref: "vpc.id" }` reads an output of another resource,
//! - `{ $set: [...] }` is an unordered collection,
//! - `{ $config: key }` is replaced by a setting while the graph is built.
//!
//! The *symbolic* JSON form keeps references as `{"$ref": ...}` and sets as
//! sorted `{"$set": [...]}`; it is what the differ compares and what state
//! records as the last-applied attributes.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::Settings;
use crate::error::{GraphError, Result, StrataError};

/// Object key marking a reference.
pub const REF_KEY: &str = "$ref";

/// Object key marking an unordered set.
pub const SET_KEY: &str = "$set";

/// Object key marking a settings lookup.
pub const CONFIG_KEY: &str = "$config";

/// A reference to an attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Logical name of the referenced resource.
    pub resource: String,
    /// Attribute path inside that resource (`id`, `tags.Name`, `ips.0`).
    pub path: Vec<String>,
}

/// A desired attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(Number),
    /// String.
    String(String),
    /// Ordered list; element order is significant.
    List(Vec<Self>),
    /// Unordered collection, kept sorted and deduplicated.
    Set(Vec<Self>),
    /// Mapping; key order is not significant.
    Map(BTreeMap<String, Self>),
    /// Reference to another resource's output.
    Ref(Reference),
}

impl Reference {
    /// Parses `name.path.to.attr`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the expression is malformed.
    pub fn parse(expression: &str) -> std::result::Result<Self, String> {
        let (resource, path) = expression
            .split_once('.')
            .ok_or_else(|| String::from("expected <resource>.<attribute>"))?;

        if resource.is_empty() {
            return Err(String::from("resource name is empty"));
        }

        let path: Vec<String> = path.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(String::from("attribute path has an empty segment"));
        }

        Ok(Self {
            resource: resource.to_string(),
            path,
        })
    }

    /// Returns the dotted attribute path.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.path_string())
    }
}

impl Attr {
    /// Builds a set, sorting and deduplicating its members.
    #[must_use]
    pub fn set(items: Vec<Self>) -> Self {
        let mut keyed: Vec<(String, Self)> = items
            .into_iter()
            .map(|item| (canonical_string(&item.to_symbolic()), item))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        Self::Set(keyed.into_iter().map(|(_, item)| item).collect())
    }

    /// Builds a reference attribute.
    #[must_use]
    pub fn reference(resource: impl Into<String>, path: &str) -> Self {
        Self::Ref(Reference {
            resource: resource.into(),
            path: path.split('.').map(str::to_string).collect(),
        })
    }

    /// Parses a configuration value, resolving `$config` through settings.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed special forms or missing settings.
    pub fn parse(value: &Value, resource: &str, settings: &Settings) -> Result<Self> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(|v| Self::parse(v, resource, settings))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                if let Some(special) = single_key(map) {
                    return Self::parse_special(special, resource, settings);
                }
                Self::Map(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), Self::parse(v, resource, settings)?)))
                        .collect::<Result<_>>()?,
                )
            }
        })
    }

    /// Parses one of the `$ref`, `$set` or `$config` forms.
    fn parse_special(
        (key, value): (&str, &Value),
        resource: &str,
        settings: &Settings,
    ) -> Result<Self> {
        let invalid = |reason: &str| {
            StrataError::Graph(GraphError::InvalidReference {
                resource: resource.to_string(),
                expression: format!("{{{key}: {value}}}"),
                reason: reason.to_string(),
            })
        };

        match key {
            REF_KEY => {
                let expression = value.as_str().ok_or_else(|| invalid("$ref takes a string"))?;
                let reference = Reference::parse(expression).map_err(|reason| invalid(&reason))?;
                Ok(Self::Ref(reference))
            }
            SET_KEY => {
                let items = value.as_array().ok_or_else(|| invalid("$set takes a list"))?;
                let items = items
                    .iter()
                    .map(|v| Self::parse(v, resource, settings))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::set(items))
            }
            _ => {
                let setting = value.as_str().ok_or_else(|| invalid("$config takes a key name"))?;
                let resolved = settings.require(setting)?;
                Ok(Self::String(resolved.to_string()))
            }
        }
    }

    /// Rebuilds an attribute from its symbolic JSON form.
    #[must_use]
    pub fn from_symbolic(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_symbolic).collect()),
            Value::Object(map) => {
                if let Some((REF_KEY, Value::String(expr))) = single_key(map)
                    && let Ok(reference) = Reference::parse(expr)
                {
                    return Self::Ref(reference);
                }
                if let Some((SET_KEY, Value::Array(items))) = single_key(map) {
                    return Self::set(items.iter().map(Self::from_symbolic).collect());
                }
                Self::Map(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::from_symbolic(v)))
                        .collect(),
                )
            }
        }
    }

    /// Returns the symbolic JSON form.
    #[must_use]
    pub fn to_symbolic(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_symbolic).collect()),
            Self::Set(items) => {
                let mut map = Map::new();
                map.insert(
                    SET_KEY.to_string(),
                    Value::Array(items.iter().map(Self::to_symbolic).collect()),
                );
                Value::Object(map)
            }
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_symbolic()))
                    .collect(),
            ),
            Self::Ref(reference) => {
                let mut map = Map::new();
                map.insert(REF_KEY.to_string(), Value::String(reference.to_string()));
                Value::Object(map)
            }
        }
    }

    /// Collects every reference in the tree, depth first.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(reference) => refs.push(reference),
            Self::List(items) | Self::Set(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(refs);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Produces the concrete value sent to a provider.
    ///
    /// Sets become plain (sorted) arrays and references are replaced by the
    /// value returned from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not resolve.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) | Self::Set(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(lookup))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(lookup)?)))
                    .collect::<std::result::Result<_, Reference>>()?,
            ),
            Self::Ref(reference) => lookup(reference).ok_or_else(|| reference.clone())?,
        })
    }
}

/// Returns the only entry of a one-key object if that key is special.
fn single_key(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    map.iter()
        .next()
        .filter(|(k, _)| matches!(k.as_str(), REF_KEY | SET_KEY | CONFIG_KEY))
        .map(|(k, v)| (k.as_str(), v))
}

/// Serializes a value with object keys in sorted order.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(out, &map[key.as_str()]);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: &Value) -> Attr {
        Attr::parse(value, "test", &Settings::new()).expect("attribute parses")
    }

    #[test]
    fn test_reference_parse() {
        let reference = Reference::parse("my-vpc.tags.Name").expect("valid");
        assert_eq!(reference.resource, "my-vpc");
        assert_eq!(reference.path, vec!["tags", "Name"]);
        assert_eq!(reference.to_string(), "my-vpc.tags.Name");

        assert!(Reference::parse("my-vpc").is_err());
        assert!(Reference::parse(".id").is_err());
        assert!(Reference::parse("vpc..id").is_err());
    }

    #[test]
    fn test_parse_special_forms() {
        let attr = parse(&json!({
            "vpc_id": { "$ref": "vpc.id" },
            "groups": { "$set": ["b", "a", "b"] },
        }));

        let Attr::Map(entries) = &attr else {
            panic!("expected a map");
        };
        assert_eq!(entries["vpc_id"], Attr::reference("vpc", "id"));
        assert_eq!(
            entries["groups"],
            Attr::Set(vec![Attr::String("a".into()), Attr::String("b".into())])
        );
        assert_eq!(attr.references().len(), 1);
    }

    #[test]
    fn test_config_lookup() {
        let settings = Settings::new().with_value("ssh_key_name", "ops");
        let attr = Attr::parse(&json!({ "$config": "ssh_key_name" }), "vm", &settings)
            .expect("setting resolves");
        assert_eq!(attr, Attr::String("ops".into()));

        let err = Attr::parse(&json!({ "$config": "ami_id" }), "vm", &settings).unwrap_err();
        assert!(err.to_string().contains("ami_id"));
    }

    #[test]
    fn test_invalid_ref_is_rejected() {
        let err = Attr::parse(&json!({ "$ref": 42 }), "vm", &Settings::new()).unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::InvalidReference { .. })));
    }

    #[test]
    fn test_set_order_independent() {
        let a = parse(&json!({ "$set": ["x", "y"] }));
        let b = parse(&json!({ "$set": ["y", "x"] }));
        assert_eq!(a, b);
        assert_eq!(a.to_symbolic(), b.to_symbolic());
    }

    #[test]
    fn test_list_order_dependent() {
        let a = parse(&json!([{ "from_port": 22 }, { "from_port": 6443 }]));
        let b = parse(&json!([{ "from_port": 6443 }, { "from_port": 22 }]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_symbolic_round_trip_keeps_refs() {
        let attr = parse(&json!({ "subnet_id": { "$ref": "subnet.id" }, "n": 3 }));
        let symbolic = attr.to_symbolic();
        assert_eq!(symbolic["subnet_id"], json!({ "$ref": "subnet.id" }));
        assert_eq!(Attr::from_symbolic(&symbolic), attr);
    }

    #[test]
    fn test_resolve_substitutes_references() {
        let attr = parse(&json!({
            "vpc_id": { "$ref": "vpc.id" },
            "sg": { "$set": [{ "$ref": "sg.id" }] },
        }));
        let lookup = |r: &Reference| match r.resource.as_str() {
            "vpc" => Some(json!("vpc-123")),
            "sg" => Some(json!("sg-9")),
            _ => None,
        };
        let resolved = attr.resolve(&lookup).expect("all references resolve");
        assert_eq!(resolved, json!({ "vpc_id": "vpc-123", "sg": ["sg-9"] }));

        let missing = parse(&json!({ "x": { "$ref": "gone.id" } }));
        let err = missing.resolve(&lookup).unwrap_err();
        assert_eq!(err.resource, "gone");
    }

    #[test]
    fn test_canonical_string_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":[true,null]}"#).expect("json");
        assert_eq!(canonical_string(&a), r#"{"a":[true,null],"b":1}"#);
    }
}
