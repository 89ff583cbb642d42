//! Reconciler driving a full run.
//!
//! A run builds the resource graph from the stack configuration, diffs it
//! against stored state, executes the plan under the state lock, and exports
//! outputs from whatever state the run left behind.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{AttributeHasher, Settings, StackConfig, expand_resources};
use crate::error::{PlanError, Result};
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::outputs::{OutputExporter, OutputValue};
use crate::planner::{Differ, ExecutionReport, Executor, ExecutorOptions, NodeStatus, Plan};
use crate::provider::Provider;
use crate::state::{StateStore, generate_holder_id};

/// Reconciler for one stack.
pub struct Reconciler<'a> {
    /// Stack configuration.
    config: &'a StackConfig,
    /// Settings passed to the graph builder.
    settings: Settings,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Provider collaborator.
    provider: Arc<dyn Provider>,
    /// Executor tuning.
    options: ExecutorOptions,
    /// Differ.
    differ: Differ,
}

impl fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.config.project.name)
            .field("store", &self.store.backend_type())
            .field("provider", &self.provider.provider_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Result of an apply.
#[derive(Debug)]
pub struct ReconciliationResult {
    /// Per-node execution report.
    pub report: ExecutionReport,
    /// Outputs read after execution.
    pub outputs: Vec<OutputValue>,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler using the stack's own execution settings.
    #[must_use]
    pub fn new(config: &'a StackConfig, store: Arc<dyn StateStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            settings: Settings::from_config(&config.settings),
            store,
            provider,
            options: ExecutorOptions::from_config(&config.execution),
            differ: Differ::new(),
        }
    }

    /// Overrides the executor options.
    #[must_use]
    pub const fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Builds the resource graph from the stack configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for missing settings, unknown references or cycles.
    pub fn build_graph(&self) -> Result<ResourceGraph> {
        let expanded = expand_resources(&self.config.resources)?;
        GraphBuilder::new(&self.settings).build_stack(&expanded)
    }

    /// Computes the plan for the current configuration. Has no side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built or state cannot be read.
    pub async fn plan(&self) -> Result<Plan> {
        let hasher = AttributeHasher::new();
        info!(
            "Planning {}/{} (config {})",
            self.config.project.name,
            self.config.project.environment,
            hasher.short_hash(&hasher.hash_stack(self.config))
        );

        let graph = self.build_graph()?;
        let stored = self.store.list().await?;
        debug!("Loaded {} stored resources", stored.len());

        let plan = self.differ.diff(&graph, &stored)?;
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    /// Computes a plan deleting every stored resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or stored dependencies form
    /// a cycle.
    pub async fn destroy_plan(&self) -> Result<Plan> {
        let stored = self.store.list().await?;
        let plan = self.differ.destroy_plan(&stored)?;
        info!("Destroy plan: {}", plan.summary());
        Ok(plan)
    }

    /// Executes a plan under the state lock, then exports outputs.
    ///
    /// A plan carrying a state fingerprint is refused when state changed
    /// after it was computed. Node failures are reported in the result
    /// rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere, the plan is stale
    /// or malformed, or outputs cannot be read.
    pub async fn apply(&self, plan: &Plan, cancel: watch::Receiver<bool>) -> Result<ReconciliationResult> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let report = self.execute_locked(plan, cancel).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
        }
        let report = report?;

        if !report.is_success() {
            warn!("Run incomplete: {report}");
        }

        let outputs = self.outputs().await?;
        Ok(ReconciliationResult { report, outputs })
    }

    /// Runs the executor. The caller holds the state lock.
    async fn execute_locked(&self, plan: &Plan, cancel: watch::Receiver<bool>) -> Result<ExecutionReport> {
        if let Some(expected) = &plan.state_fingerprint {
            let stored = self.store.list().await?;
            if self.differ.state_fingerprint(&stored) != *expected {
                warn!("State changed since the plan was computed");
                return Err(PlanError::StaleState.into());
            }
        }

        let executor = Executor::new(Arc::clone(&self.provider), Arc::clone(&self.store), self.options);
        executor.execute(plan, cancel).await
    }

    /// Resolves the declared outputs from stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be expanded or state
    /// cannot be read.
    pub async fn outputs(&self) -> Result<Vec<OutputValue>> {
        let expanded = expand_resources(&self.config.resources)?;
        let states = self.store.list().await?;
        Ok(OutputExporter::new(&expanded.groups).export(&self.config.outputs, &states))
    }
}

impl ReconciliationResult {
    /// Returns true if every node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Succeeded: {}", self.report.count(NodeStatus::Succeeded))?;
        writeln!(f, "  Failed: {}", self.report.count(NodeStatus::Failed))?;
        writeln!(f, "  Skipped: {}", self.report.count(NodeStatus::Skipped))?;
        writeln!(f, "  Not started: {}", self.report.count(NodeStatus::Pending))?;

        let errors: Vec<_> = self.report.nodes.iter().filter_map(|n| n.error.as_ref().map(|e| (&n.name, e))).collect();
        if !errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for (name, error) in errors {
                writeln!(f, "    - {name}: {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{ConfigError, GraphError, StrataError};
    use crate::planner::ActionType;
    use crate::provider::SimulatedProvider;
    use crate::state::MemoryStateStore;
    use serde_json::{Value, json};
    use std::time::Duration;

    const STACK: &str = r#"
project:
  name: cluster
state:
  backend: memory
execution:
  initial_backoff_ms: 1
  max_backoff_ms: 5
settings:
  required: [ssh_key_name]
  values:
    ssh_key_name: ops
resources:
  - name: vpc
    kind: aws:ec2/vpc
    attributes:
      cidr_block: 10.0.0.0/16
  - name: node
    kind: aws:ec2/instance
    for_each: [control-plane-1, worker-1]
    attributes:
      key_name: { $config: ssh_key_name }
      vpc: { $ref: vpc.id }
      tags: { Name: "${each.value}" }
outputs:
  - name: instance_ips
    sources: ["node[*].public_ip"]
  - name: vpc_id
    sources: [vpc.id]
"#;

    fn stack(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("stack parses")
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_apply_then_converged() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new());
        let reconciler = Reconciler::new(&config, store.clone(), provider.clone());

        let plan = reconciler.plan().await.expect("plan");
        assert_eq!(plan.summary().creates, 3);

        let result = reconciler.apply(&plan, no_cancel()).await.expect("apply");
        assert!(result.is_success());
        let mut ips = result.outputs[0].values.clone();
        ips.sort_by_key(Value::to_string);
        assert_eq!(ips, vec![json!("203.0.113.1"), json!("203.0.113.2")]);
        assert!(result.outputs[1].values[0].as_str().is_some_and(|id| id.starts_with("vpc-")));
        assert!(!store.is_locked().await.expect("lock info"));

        let plan = reconciler.plan().await.expect("second plan");
        assert!(plan.is_empty());
        assert_eq!(plan.summary().unchanged, 3);
        assert_eq!(provider.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new());
        let reconciler = Reconciler::new(&config, store.clone(), provider.clone());

        let plan = reconciler.plan().await.expect("plan");
        reconciler.apply(&plan, no_cancel()).await.expect("apply");

        let destroy = reconciler.destroy_plan().await.expect("destroy plan");
        assert_eq!(destroy.summary().deletes, 3);
        assert_eq!(destroy.actions.last().map(|a| a.resource_name.as_str()), Some("vpc"));

        let result = reconciler.apply(&destroy, no_cancel()).await.expect("destroy");
        assert!(result.is_success());
        assert_eq!(provider.resource_count().await, 0);
        assert_eq!(result.outputs[1].values, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_missing_setting_fails_before_planning() {
        let yaml = STACK.replace("  values:\n    ssh_key_name: ops\n", "");
        let config = stack(&yaml);
        let reconciler = Reconciler::new(&config, Arc::new(MemoryStateStore::new()), Arc::new(SimulatedProvider::new()));

        let err = reconciler.plan().await.unwrap_err();
        assert!(matches!(err, StrataError::Config(ConfigError::MissingConfig { ref key }) if key == "ssh_key_name"));
    }

    #[tokio::test]
    async fn test_unknown_reference_fails_before_planning() {
        let yaml = r#"
project:
  name: broken
resources:
  - name: s1
    kind: aws:ec2/subnet
    attributes:
      vpc_id: { $ref: v1.id }
"#;
        let config = stack(yaml);
        let provider = Arc::new(SimulatedProvider::new());
        let reconciler = Reconciler::new(&config, Arc::new(MemoryStateStore::new()), provider.clone());

        let err = reconciler.plan().await.unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::UnknownReference { .. })));
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_refuses_when_locked() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        store.acquire_lock("someone-else").await.expect("lock");

        let reconciler = Reconciler::new(&config, store.clone(), Arc::new(SimulatedProvider::new()));
        let plan = reconciler.plan().await.expect("plan");
        assert!(reconciler.apply(&plan, no_cancel()).await.is_err());
    }

    #[tokio::test]
    async fn test_applying_same_plan_twice_is_refused() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new());
        let reconciler = Reconciler::new(&config, store.clone(), provider.clone());

        let plan = reconciler.plan().await.expect("plan");
        assert!(reconciler.apply(&plan, no_cancel()).await.expect("first apply").is_success());

        let err = reconciler.apply(&plan, no_cancel()).await.unwrap_err();
        assert!(matches!(err, StrataError::Plan(PlanError::StaleState)));
        assert_eq!(provider.resource_count().await, 3);
        assert_eq!(provider.calls().await.len(), 3);
        assert!(!store.is_locked().await.expect("lock info"));
    }

    #[tokio::test]
    async fn test_plan_from_concurrent_run_is_refused() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new());
        let first = Reconciler::new(&config, store.clone(), provider.clone());
        let second = Reconciler::new(&config, store.clone(), provider.clone());

        // Both plan against empty state; only the first may apply.
        let early = first.plan().await.expect("plan");
        let late = second.plan().await.expect("plan");
        assert_eq!(early.state_fingerprint, late.state_fingerprint);

        first.apply(&early, no_cancel()).await.expect("apply");
        assert!(second.apply(&late, no_cancel()).await.is_err());
        assert_eq!(provider.resource_count().await, 3);

        // Replanning picks up the other run's state and converges.
        let fresh = second.plan().await.expect("replan");
        assert!(fresh.is_empty());
        assert!(second.apply(&fresh, no_cancel()).await.expect("noop apply").is_success());
    }

    #[tokio::test]
    async fn test_changed_attribute_plans_update() {
        let config = stack(STACK);
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(1)));
        let reconciler = Reconciler::new(&config, store.clone(), provider);
        let plan = reconciler.plan().await.expect("plan");
        reconciler.apply(&plan, no_cancel()).await.expect("apply");

        let changed = stack(&STACK.replace("10.0.0.0/16", "10.8.0.0/16"));
        let reconciler = Reconciler::new(&changed, store, Arc::new(SimulatedProvider::new()));
        let plan = reconciler.plan().await.expect("plan");
        assert_eq!(plan.action("vpc").map(|a| a.action_type), Some(ActionType::Update));
        assert_eq!(plan.action("node-0").map(|a| a.action_type), Some(ActionType::Noop));
    }
}
