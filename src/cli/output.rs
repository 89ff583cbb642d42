//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::outputs::{OutputValue, outputs_to_json};
use crate::planner::{ActionType, ExecutionReport, NodeStatus, Plan};
use crate::state::{LockInfo, ResourceState, ResourceStatus};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Node outcome row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Stored resource row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!("{} No changes. Infrastructure matches the configuration.\n", "✓".green());
        }

        let mut output = String::from("\nPlan\n\n");

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| detailed || a.is_change())
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.resource_name.clone(),
                kind: a.kind.clone(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actions.iter().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "\n  {} {}:", action.action_type, action.resource_name);
                for field in &action.changes {
                    let _ = writeln!(output, "    ~ {field}");
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.deletes.to_string().red(),
            summary.unchanged
        );

        output
    }

    /// Formats the per-node outcome of a run.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "success": report.is_success(),
                "cancelled": report.cancelled,
                "duration_ms": u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
                "nodes": report.nodes,
            })),
            OutputFormat::Text => {
                let rows: Vec<NodeRow> = report
                    .nodes
                    .iter()
                    .map(|n| NodeRow {
                        name: n.name.clone(),
                        action: n.action_type.to_string(),
                        status: Self::format_node_status(n.status),
                        attempts: n.attempts,
                        id: n.resource_id.clone().unwrap_or_default(),
                        error: Self::truncate(n.error.as_deref().unwrap_or(""), 60),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');

                let headline = if report.is_success() {
                    format!("{} Apply complete", "✓".green())
                } else if report.cancelled && report.count(NodeStatus::Failed) == 0 {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply failed", "✗".red())
                };
                let _ = write!(output, "\n{headline}: {report}\n");
                output
            }
        }
    }

    /// Formats resolved outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &[OutputValue]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&outputs_to_json(outputs)),
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return String::from("No outputs declared.\n");
                }
                let mut output = String::from("\nOutputs:\n");
                for value in outputs {
                    let rendered: Vec<String> = value.values.iter().map(Self::format_value).collect();
                    let _ = writeln!(output, "   {} = [{}]", value.name.bold(), rendered.join(", "));
                }
                output
            }
        }
    }

    /// Formats a list of stored records.
    #[must_use]
    pub fn format_state_list(&self, states: &[ResourceState]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&states),
            OutputFormat::Text => {
                if states.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<StateRow> = states
                    .iter()
                    .map(|s| StateRow {
                        name: s.name.clone(),
                        kind: s.kind.clone(),
                        status: Self::format_resource_status(s.status),
                        id: s.id.clone().unwrap_or_default(),
                        updated: s.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one stored record.
    #[must_use]
    pub fn format_state_record(&self, state: &ResourceState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\n{} ({})", state.name.bold(), state.kind);
                let _ = writeln!(output, "   Status: {}", Self::format_resource_status(state.status));
                let _ = writeln!(output, "   ID: {}", state.id.as_deref().unwrap_or("-"));
                let _ = writeln!(
                    output,
                    "   Hash: {}",
                    &state.attributes_hash[..12.min(state.attributes_hash.len())]
                );
                if !state.dependencies.is_empty() {
                    let _ = writeln!(output, "   Depends on: {}", state.dependencies.join(", "));
                }
                if let Some(error) = &state.error {
                    let _ = writeln!(output, "   Last error: {}", error.red());
                }
                let _ = writeln!(output, "   Updated: {}", state.updated_at);
                let _ = writeln!(output, "\n   Attributes:\n{}", Self::indent(&to_json(&state.attributes)));
                let outputs = Value::Object(state.outputs.clone());
                let _ = writeln!(output, "\n   Outputs:\n{}", Self::indent(&to_json(&outputs)));
                output
            }
        }
    }

    /// Formats validation results.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid.\n", "✓".green())
                } else {
                    format!("{} Configuration has {} error(s):\n", "✗".red(), result.error_count())
                };
                for issue in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", issue.field, issue.message);
                }
                if show_warnings && result.warning_count() > 0 {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, lock) => to_json(&lock),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "State locked by {} ({}), expires in {}s\n",
                lock.holder,
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    /// Formats a node status with color.
    fn format_node_status(status: NodeStatus) -> String {
        match status {
            NodeStatus::Succeeded => "succeeded".green().to_string(),
            NodeStatus::Failed => "failed".red().to_string(),
            NodeStatus::Skipped => "skipped".yellow().to_string(),
            NodeStatus::Pending | NodeStatus::InProgress => status.to_string().dimmed().to_string(),
        }
    }

    /// Formats a stored status with color.
    fn format_resource_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Created => "created".green().to_string(),
            ResourceStatus::Failed => "failed".red().to_string(),
            ResourceStatus::Pending => "pending".yellow().to_string(),
            ResourceStatus::Deleted => "deleted".dimmed().to_string(),
        }
    }

    /// Renders a scalar compactly and anything else as JSON.
    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "null".dimmed().to_string(),
            other => other.to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    fn indent(text: &str) -> String {
        text.lines().map(|l| format!("     {l}")).collect::<Vec<_>>().join("\n")
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    created_at: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    unchanged: usize,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    kind: String,
    resource_id: Option<String>,
    reason: String,
    changes: Vec<String>,
    depends_on: Vec<String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        let summary = plan.summary();
        Self {
            created_at: plan.created_at.to_rfc3339(),
            creates: summary.creates,
            updates: summary.updates,
            deletes: summary.deletes,
            unchanged: summary.unchanged,
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.resource_name.clone(),
                    kind: a.kind.clone(),
                    resource_id: a.resource_id.clone(),
                    reason: a.reason.clone(),
                    changes: a.changes.clone(),
                    depends_on: a.dependencies.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{NodeReport, PlannedAction};
    use serde_json::json;
    use std::time::Duration;

    fn plan() -> Plan {
        Plan::new(vec![PlannedAction {
            action_type: ActionType::Create,
            resource_name: String::from("vpc"),
            kind: String::from("aws:ec2/vpc"),
            spec: None,
            resource_id: None,
            replaces: None,
            reason: String::from("not in state"),
            changes: vec![String::from("cidr_block")],
            new_hash: None,
            dependencies: Vec::new(),
        }])
    }

    #[test]
    fn test_plan_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&formatter.format_plan(&plan(), false)).expect("valid json");
        assert_eq!(parsed["creates"], json!(1));
        assert_eq!(parsed["actions"][0]["action_type"], json!("create"));
        assert_eq!(parsed["actions"][0]["changes"], json!(["cidr_block"]));
    }

    #[test]
    fn test_plan_text_mentions_resource() {
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(text.contains("vpc"));
        assert!(text.contains("cidr_block"));
        let empty = OutputFormatter::new(OutputFormat::Text).format_plan(&Plan::new(Vec::new()), false);
        assert!(empty.contains("No changes"));
    }

    #[test]
    fn test_report_json_has_node_statuses() {
        let report = ExecutionReport {
            nodes: vec![NodeReport {
                name: String::from("vpc"),
                action_type: ActionType::Create,
                status: NodeStatus::Failed,
                attempts: 5,
                error: Some(String::from("throttled")),
                resource_id: None,
            }],
            cancelled: false,
            duration: Duration::from_millis(20),
        };
        let parsed: Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_report(&report)).expect("valid json");
        assert_eq!(parsed["success"], json!(false));
        assert_eq!(parsed["nodes"][0]["status"], json!("failed"));
        assert_eq!(parsed["nodes"][0]["action_type"], json!("create"));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
