//! Reconciliation plan types.
//!
//! A plan is derived on every run and never persisted. It lists one action
//! per resource together with the names of the actions that must finish
//! before it may start.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::{PlanError, Result};
use crate::graph::ResourceSpec;

/// A complete reconciliation plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Planned actions: desired resources in topological order, then deletes.
    pub actions: Vec<PlannedAction>,
    /// Hash of the stored state the plan was computed from.
    pub state_fingerprint: Option<String>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Logical resource name.
    pub resource_name: String,
    /// Resource kind the action operates on.
    pub kind: String,
    /// Desired resource, absent for deletes.
    pub spec: Option<ResourceSpec>,
    /// Existing provider identifier, if any.
    pub resource_id: Option<String>,
    /// Resource removed before a create, as `(kind, id)`.
    ///
    /// Replacement is destroy-before-create: the old resource is deleted
    /// inside this action, before dependents are updated to the new id.
    pub replaces: Option<(String, String)>,
    /// Why this action was chosen.
    pub reason: String,
    /// Top-level attributes that differ from state.
    pub changes: Vec<String>,
    /// Hash of the desired attributes.
    pub new_hash: Option<String>,
    /// Names of actions that must complete first.
    pub dependencies: Vec<String>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    Noop,
}

/// Action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Number of creates.
    pub creates: usize,
    /// Number of updates.
    pub updates: usize,
    /// Number of deletes.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl Plan {
    /// Creates a plan from ordered actions.
    #[must_use]
    pub fn new(actions: Vec<PlannedAction>) -> Self {
        Self {
            created_at: Utc::now(),
            actions,
            state_fingerprint: None,
        }
    }

    /// Records the stored state the plan was computed from.
    #[must_use]
    pub fn with_state_fingerprint(mut self, fingerprint: String) -> Self {
        self.state_fingerprint = Some(fingerprint);
        self
    }

    /// Returns true if no action changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.iter().all(|a| a.action_type == ActionType::Noop)
    }

    /// Returns the action for a resource.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.resource_name == name)
    }

    /// Returns the action types in plan order.
    #[must_use]
    pub fn action_types(&self) -> Vec<(&str, ActionType)> {
        self.actions
            .iter()
            .map(|a| (a.resource_name.as_str(), a.action_type))
            .collect()
    }

    /// Counts actions by type.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.action_type {
                ActionType::Create => summary.creates += 1,
                ActionType::Update => summary.updates += 1,
                ActionType::Delete => summary.deletes += 1,
                ActionType::Noop => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Checks that every dependency names an action and that dependencies
    /// are acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownDependency`] or [`PlanError::StoredCycle`].
    pub fn validate(&self) -> Result<()> {
        let mut remaining: HashMap<&str, usize> = HashMap::with_capacity(self.actions.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for action in &self.actions {
            remaining.insert(&action.resource_name, action.dependencies.len());
        }
        for action in &self.actions {
            for dep in &action.dependencies {
                if !remaining.contains_key(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        action: action.resource_name.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
                dependents.entry(dep.as_str()).or_default().push(&action.resource_name);
            }
        }

        let mut ready: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut visited = 0;
        while let Some(name) = ready.pop_front() {
            visited += 1;
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(*dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        if visited == self.actions.len() {
            return Ok(());
        }

        let mut cycle: Vec<String> = remaining
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        cycle.sort();
        Err(PlanError::StoredCycle { cycle }.into())
    }
}

impl PlannedAction {
    /// Returns true if executing the action calls the provider.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.action_type != ActionType::Noop
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.creates, self.updates, self.deletes, self.unchanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;

    fn action(name: &str, action_type: ActionType, deps: &[&str]) -> PlannedAction {
        PlannedAction {
            action_type,
            resource_name: name.to_string(),
            kind: String::from("k"),
            spec: None,
            resource_id: None,
            replaces: None,
            reason: String::new(),
            changes: Vec::new(),
            new_hash: None,
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    #[test]
    fn test_summary_and_empty() {
        let plan = Plan::new(vec![
            action("a", ActionType::Noop, &[]),
            action("b", ActionType::Create, &["a"]),
            action("c", ActionType::Delete, &[]),
        ]);
        let summary = plan.summary();
        assert_eq!(summary.creates, 1);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.unchanged, 1);
        assert!(!plan.is_empty());
        assert_eq!(summary.to_string(), "1 to create, 0 to update, 1 to delete, 1 unchanged");

        let plan = Plan::new(vec![action("a", ActionType::Noop, &[])]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let plan = Plan::new(vec![action("a", ActionType::Create, &["ghost"])]);
        assert!(matches!(
            plan.validate().unwrap_err(),
            StrataError::Plan(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_validate_cycle() {
        let plan = Plan::new(vec![
            action("a", ActionType::Delete, &["b"]),
            action("b", ActionType::Delete, &["a"]),
            action("c", ActionType::Create, &[]),
        ]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(
            err,
            StrataError::Plan(PlanError::StoredCycle { ref cycle }) if cycle == &["a", "b"]
        ));
    }
}
