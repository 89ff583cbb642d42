//! Output exporter.
//!
//! Outputs are read from finalized resource state after a run. A source is
//! either `resource.path` or `group[*].path`, the latter expanding over the
//! members of a `count` / `for_each` group in index order. Missing state or
//! a missing attribute yields `null`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::config::OutputConfig;
use crate::state::ResourceState;

/// Suffix marking a group source.
const GROUP_SUFFIX: &str = "[*]";

/// One resolved output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputValue {
    /// Output name.
    pub name: String,
    /// Resolved values, one per source member.
    pub values: Vec<Value>,
}

/// Resolves declared outputs against stored state.
#[derive(Debug)]
pub struct OutputExporter<'a> {
    groups: &'a BTreeMap<String, Vec<String>>,
}

impl<'a> OutputExporter<'a> {
    /// Creates an exporter that expands `[*]` sources over `groups`.
    #[must_use]
    pub const fn new(groups: &'a BTreeMap<String, Vec<String>>) -> Self {
        Self { groups }
    }

    /// Resolves every output in declaration order.
    #[must_use]
    pub fn export(&self, outputs: &[OutputConfig], states: &[ResourceState]) -> Vec<OutputValue> {
        let live: HashMap<&str, &ResourceState> = states
            .iter()
            .filter(|s| s.is_live())
            .map(|s| (s.name.as_str(), s))
            .collect();

        outputs
            .iter()
            .map(|output| OutputValue {
                name: output.name.clone(),
                values: output
                    .sources
                    .iter()
                    .flat_map(|source| self.resolve_source(source, &live))
                    .collect(),
            })
            .collect()
    }

    fn resolve_source(&self, source: &str, live: &HashMap<&str, &ResourceState>) -> Vec<Value> {
        let Some((target, path)) = source.split_once('.') else {
            debug!("Output source '{source}' has no attribute path");
            return vec![Value::Null];
        };
        let path: Vec<String> = path.split('.').map(str::to_string).collect();

        let lookup = |name: &str| {
            live.get(name)
                .and_then(|state| state.lookup(&path))
                .unwrap_or(Value::Null)
        };

        match target.strip_suffix(GROUP_SUFFIX) {
            Some(group) => match self.groups.get(group) {
                Some(members) => members.iter().map(|m| lookup(m.as_str())).collect(),
                None => {
                    debug!("Output source '{source}' names unknown group '{group}'");
                    vec![Value::Null]
                }
            },
            None => vec![lookup(target)],
        }
    }
}

/// Renders outputs as a JSON object of name to values.
#[must_use]
pub fn outputs_to_json(outputs: &[OutputValue]) -> Value {
    let map: Map<String, Value> = outputs
        .iter()
        .map(|o| (o.name.clone(), Value::Array(o.values.clone())))
        .collect();
    Value::Object(map)
}
