//! Differ comparing the desired graph against stored state.
//!
//! Desired attributes are compared in symbolic form: references stay as
//! references, so the plan does not depend on values that only exist once
//! execution has run. Maps and `$set` collections compare without regard to
//! order; lists compare element by element.

use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::AttributeHasher;
use crate::error::Result;
use crate::graph::{Attr, ResourceGraph, ResourceNode};
use crate::state::{ResourceState, ResourceStatus};

use super::plan::{ActionType, Plan, PlannedAction};

/// Computes plans.
#[derive(Debug, Default)]
pub struct Differ {
    /// Attribute hasher.
    hasher: AttributeHasher,
}

impl Differ {
    /// Creates a new differ.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: AttributeHasher::new(),
        }
    }

    /// Computes the plan that moves `stored` to the desired `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if stored dependencies among deleted resources form
    /// a cycle.
    pub fn diff(&self, graph: &ResourceGraph, stored: &[ResourceState]) -> Result<Plan> {
        let by_name: HashMap<&str, &ResourceState> = stored.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut actions: Vec<PlannedAction> = Vec::with_capacity(graph.len() + stored.len());
        let mut creating: HashSet<&str> = HashSet::new();

        for node in graph.ordered_nodes() {
            let current = by_name.get(node.name()).copied();
            let action = self.diff_node(node, current, &creating);
            if action.action_type == ActionType::Create {
                creating.insert(node.name());
            }
            debug!("{}: {} ({})", action.resource_name, action.action_type, action.reason);
            actions.push(action);
        }

        let deletes = delete_order(graph, stored);
        for state in deletes {
            actions.push(PlannedAction {
                action_type: ActionType::Delete,
                resource_name: state.name.clone(),
                kind: state.kind.clone(),
                spec: None,
                resource_id: state.id.clone(),
                replaces: None,
                reason: String::from("removed from configuration"),
                changes: Vec::new(),
                new_hash: None,
                dependencies: Vec::new(),
            });
        }

        // A delete waits for every action whose stored state still reads it.
        let deleted: HashSet<&str> = actions
            .iter()
            .filter(|a| a.action_type == ActionType::Delete)
            .map(|a| a.resource_name.as_str())
            .collect();
        let mut waits: HashMap<String, Vec<String>> = HashMap::new();
        for action in &actions {
            let Some(state) = by_name.get(action.resource_name.as_str()) else {
                continue;
            };
            for dep in &state.dependencies {
                if deleted.contains(dep.as_str()) && dep != &action.resource_name {
                    waits.entry(dep.clone()).or_default().push(action.resource_name.clone());
                }
            }
        }
        for action in &mut actions {
            if let Some(mut names) = waits.remove(&action.resource_name) {
                names.sort();
                action.dependencies = names;
            }
        }

        let plan = Plan::new(actions).with_state_fingerprint(self.state_fingerprint(stored));
        plan.validate()?;
        Ok(plan)
    }

    /// Hashes the parts of stored state a plan is derived from.
    ///
    /// Two lists with the same fingerprint produce the same plan for the
    /// same graph, whatever their order.
    #[must_use]
    pub fn state_fingerprint(&self, stored: &[ResourceState]) -> String {
        let mut records: Vec<&ResourceState> = stored.iter().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        let records: Vec<Value> = records
            .into_iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "kind": s.kind,
                    "status": s.status,
                    "id": s.id,
                    "attributes": s.attributes,
                    "dependencies": s.dependencies,
                })
            })
            .collect();
        self.hasher.hash_value(&Value::Array(records))
    }

    /// Computes a plan that deletes every stored resource.
    ///
    /// # Errors
    ///
    /// Returns an error if stored dependencies form a cycle.
    pub fn destroy_plan(&self, stored: &[ResourceState]) -> Result<Plan> {
        self.diff(&ResourceGraph::default(), stored)
    }

    /// Chooses the action for one desired node.
    fn diff_node(&self, node: &ResourceNode, current: Option<&ResourceState>, creating: &HashSet<&str>) -> PlannedAction {
        let spec = &node.spec;
        let symbolic = spec.symbolic_attributes();
        let new_hash = self.hasher.hash_value(&symbolic);

        let mut action = PlannedAction {
            action_type: ActionType::Create,
            resource_name: spec.name.clone(),
            kind: spec.kind.clone(),
            spec: Some(spec.clone()),
            resource_id: None,
            replaces: None,
            reason: String::new(),
            changes: Vec::new(),
            new_hash: Some(new_hash),
            dependencies: node.dependencies.iter().cloned().collect(),
        };

        let Some(state) = current.filter(|s| s.is_live()) else {
            action.reason = String::from(if current.is_some() {
                "previously deleted"
            } else {
                "not in state"
            });
            action.changes = spec.attributes.keys().cloned().collect();
            return action;
        };

        if state.kind != spec.kind {
            action.replaces = state.id.clone().map(|id| (state.kind.clone(), id));
            action.reason = format!("kind changed from {} to {}", state.kind, spec.kind);
            action.changes = spec.attributes.keys().cloned().collect();
            return action;
        }

        let incomplete = matches!(state.status, ResourceStatus::Pending | ResourceStatus::Failed);
        let Some(id) = state.id.clone() else {
            action.reason = String::from("previous create did not complete");
            action.changes = spec.attributes.keys().cloned().collect();
            return action;
        };
        action.resource_id = Some(id);

        action.changes = changed_fields(&spec.attributes, state);
        let replaced_dependency = node.dependencies.iter().find(|dep| creating.contains(dep.as_str()));

        (action.action_type, action.reason) = if !action.changes.is_empty() {
            (ActionType::Update, String::from("attributes changed"))
        } else if incomplete {
            (ActionType::Update, format!("last attempt ended {}", state.status))
        } else if let Some(dep) = replaced_dependency {
            (ActionType::Update, format!("dependency {dep} is being created"))
        } else {
            (ActionType::Noop, String::from("up to date"))
        };

        action
    }
}

/// Lists top-level attributes whose desired value differs from state.
fn changed_fields(desired: &std::collections::BTreeMap<String, Attr>, state: &ResourceState) -> Vec<String> {
    let empty = serde_json::Map::new();
    let stored = state.attributes.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = desired.keys().chain(stored.keys()).collect();
    keys.into_iter()
        .filter(|key| {
            let old = stored.get(key.as_str()).map(Attr::from_symbolic);
            desired.get(key.as_str()) != old.as_ref()
        })
        .cloned()
        .collect()
}

/// Returns live stored resources absent from `graph`, dependents first.
fn delete_order<'a>(graph: &ResourceGraph, stored: &'a [ResourceState]) -> Vec<&'a ResourceState> {
    let doomed: HashMap<&str, &ResourceState> = stored
        .iter()
        .filter(|s| s.is_live() && !graph.contains(&s.name))
        .map(|s| (s.name.as_str(), s))
        .collect();

    // Post-order over stored dependencies gives dependencies first. The walk
    // keeps its own stack so chain depth is not limited by the thread stack.
    let mut order: Vec<&ResourceState> = Vec::with_capacity(doomed.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut frames: Vec<(&'a ResourceState, std::slice::Iter<'a, String>)> = Vec::new();
    for root in stored.iter().filter(|s| doomed.contains_key(s.name.as_str())) {
        if !visited.insert(root.name.as_str()) {
            continue;
        }
        frames.push((root, root.dependencies.iter()));

        while let Some((state, pending)) = frames.last_mut() {
            match pending.next() {
                Some(dep) => {
                    if let Some(&next) = doomed.get(dep.as_str())
                        && visited.insert(next.name.as_str())
                    {
                        frames.push((next, next.dependencies.iter()));
                    }
                }
                None => {
                    order.push(*state);
                    frames.pop();
                }
            }
        }
    }
    order.reverse();
    order
}
