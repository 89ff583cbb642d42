//! Plan executor.
//!
//! Actions run on a bounded pool of tasks. An action is dispatched only after
//! every action it depends on has succeeded; a failure marks all transitive
//! dependents as skipped without calling the provider for them. Each action
//! owns the state record of its resource, so writes to one key always come
//! from a single task.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::error::{ExecutionError, Result, StrataError};
use crate::graph::{Reference, ResourceSpec};
use crate::provider::Provider;
use crate::state::{ResourceState, StateStore};

use super::plan::{ActionType, Plan, PlannedAction};
use super::retry::RetryPolicy;

/// Execution tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Maximum number of actions in flight.
    pub parallelism: usize,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
    /// Deadline for one provider call.
    pub operation_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl ExecutorOptions {
    /// Builds options from execution settings.
    #[must_use]
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            parallelism: config.parallelism.max(1),
            retry: RetryPolicy::from_config(config),
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
        }
    }

    /// Overrides the parallelism.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}

/// Lifecycle of one node during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not dispatched.
    Pending,
    /// Provider call in flight.
    InProgress,
    /// Finished successfully, or had nothing to do.
    Succeeded,
    /// Provider call or state write failed.
    Failed,
    /// Not attempted because a dependency failed.
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Logical resource name.
    pub name: String,
    /// Action that was planned.
    #[serde(serialize_with = "serialize_display")]
    pub action_type: ActionType,
    /// Final status.
    pub status: NodeStatus,
    /// Provider calls made, including retries.
    pub attempts: u32,
    /// Failure or skip reason.
    pub error: Option<String>,
    /// Provider identifier after the action.
    pub resource_id: Option<String>,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per-node outcomes in plan order.
    pub nodes: Vec<NodeReport>,
    /// Whether dispatch stopped on a cancellation signal.
    pub cancelled: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

impl ExecutionReport {
    /// Counts nodes with the given status.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }

    /// Returns the report for a node.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Returns true if every node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Succeeded)
    }

    /// Converts an unsuccessful run into its error.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::RunFailed`] if any node failed, otherwise
    /// [`ExecutionError::Cancelled`] if the run was cancelled.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.count(NodeStatus::Failed);
        if failed > 0 {
            return Err(ExecutionError::RunFailed { failed }.into());
        }
        if self.cancelled {
            let pending = self.count(NodeStatus::Pending);
            return Err(ExecutionError::Cancelled { pending }.into());
        }
        Ok(self)
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} pending in {:.1}s",
            self.count(NodeStatus::Succeeded),
            self.count(NodeStatus::Failed),
            self.count(NodeStatus::Skipped),
            self.count(NodeStatus::Pending),
            self.duration.as_secs_f64()
        )
    }
}

fn serialize_display<S: serde::Serializer>(value: &ActionType, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Executes plans against a provider, recording results in a state store.
pub struct Executor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    options: ExecutorOptions,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.provider.provider_type())
            .field("store", &self.store.backend_type())
            .field("options", &self.options)
            .finish()
    }
}

/// Result of one node task.
struct NodeOutcome {
    index: usize,
    attempts: u32,
    result: Result<Option<String>>,
}

impl Executor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>, options: ExecutorOptions) -> Self {
        Self {
            provider,
            store,
            options,
        }
    }

    /// Executes a plan.
    ///
    /// Setting `cancel` to true stops dispatch of new actions; actions
    /// already in flight run to completion. Node failures are reported in
    /// the returned report rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan is malformed or a task panics.
    pub async fn execute(&self, plan: &Plan, mut cancel: watch::Receiver<bool>) -> Result<ExecutionReport> {
        plan.validate()?;
        let started = Instant::now();
        let actions = &plan.actions;
        info!(
            "Executing plan with {} actions (parallelism {})",
            actions.len(),
            self.options.parallelism
        );

        let index: HashMap<&str, usize> = actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.resource_name.as_str(), i))
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
        let mut remaining: Vec<usize> = Vec::with_capacity(actions.len());
        for (i, action) in actions.iter().enumerate() {
            remaining.push(action.dependencies.len());
            for dep in &action.dependencies {
                if let Some(&d) = index.get(dep.as_str()) {
                    dependents[d].push(i);
                }
            }
        }

        let mut reports: Vec<NodeReport> = actions
            .iter()
            .map(|a| NodeReport {
                name: a.resource_name.clone(),
                action_type: a.action_type,
                status: NodeStatus::Pending,
                attempts: 0,
                error: None,
                resource_id: a.resource_id.clone(),
            })
            .collect();

        let mut ready: VecDeque<usize> = (0..actions.len()).filter(|&i| remaining[i] == 0).collect();
        let mut running: JoinSet<NodeOutcome> = JoinSet::new();
        let mut cancelled = false;
        let mut watching = true;

        loop {
            cancelled = cancelled || *cancel.borrow();

            while !cancelled && running.len() < self.options.parallelism {
                let Some(i) = ready.pop_front() else {
                    break;
                };
                let action = &actions[i];

                if !action.is_change() {
                    reports[i].status = NodeStatus::Succeeded;
                    release(i, &dependents, &mut remaining, &mut ready);
                    continue;
                }

                debug!("Dispatching {} {}", action.action_type, action.resource_name);
                reports[i].status = NodeStatus::InProgress;
                let task = NodeTask {
                    provider: Arc::clone(&self.provider),
                    store: Arc::clone(&self.store),
                    retry: self.options.retry,
                    timeout: self.options.operation_timeout,
                };
                let action = action.clone();
                running.spawn(async move {
                    let mut attempts = 0;
                    let result = task.run(&action, &mut attempts).await;
                    NodeOutcome {
                        index: i,
                        attempts,
                        result,
                    }
                });
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    let Some(joined) = joined else {
                        continue;
                    };
                    let outcome = joined.map_err(|e| StrataError::internal(format!("Executor task failed: {e}")))?;
                    let i = outcome.index;
                    reports[i].attempts = outcome.attempts;
                    match outcome.result {
                        Ok(resource_id) => {
                            reports[i].status = NodeStatus::Succeeded;
                            reports[i].resource_id = resource_id;
                            release(i, &dependents, &mut remaining, &mut ready);
                        }
                        Err(e) => {
                            error!("{} failed: {e}", actions[i].resource_name);
                            reports[i].status = NodeStatus::Failed;
                            reports[i].error = Some(e.to_string());
                            skip_dependents(i, actions, &dependents, &mut reports);
                        }
                    }
                }
                changed = cancel.changed(), if watching && !cancelled => {
                    match changed {
                        Ok(()) => {
                            if *cancel.borrow() {
                                warn!("Cancellation requested, waiting for {} in-flight actions", running.len());
                                cancelled = true;
                            }
                        }
                        Err(_) => watching = false,
                    }
                }
            }
        }

        let report = ExecutionReport {
            nodes: reports,
            cancelled,
            duration: started.elapsed(),
        };
        info!("Execution finished: {report}");
        Ok(report)
    }
}

/// Marks `done` as satisfied for its dependents.
fn release(done: usize, dependents: &[Vec<usize>], remaining: &mut [usize], ready: &mut VecDeque<usize>) {
    for &dependent in &dependents[done] {
        remaining[dependent] -= 1;
        if remaining[dependent] == 0 {
            ready.push_back(dependent);
        }
    }
}

/// Marks every transitive dependent of `failed` as skipped.
fn skip_dependents(failed: usize, actions: &[PlannedAction], dependents: &[Vec<usize>], reports: &mut [NodeReport]) {
    let mut queue: VecDeque<(usize, usize)> = dependents[failed].iter().map(|&d| (d, failed)).collect();
    while let Some((i, cause)) = queue.pop_front() {
        if reports[i].status != NodeStatus::Pending {
            continue;
        }
        let skipped = ExecutionError::SkippedDueToDependencyFailure {
            resource: actions[i].resource_name.clone(),
            dependency: actions[cause].resource_name.clone(),
        };
        warn!("{skipped}");
        reports[i].status = NodeStatus::Skipped;
        reports[i].error = Some(skipped.to_string());
        queue.extend(dependents[i].iter().map(|&d| (d, i)));
    }
}

/// Everything one node needs, owned so it can move into a task.
struct NodeTask {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl NodeTask {
    async fn run(&self, action: &PlannedAction, attempts: &mut u32) -> Result<Option<String>> {
        match action.action_type {
            ActionType::Create | ActionType::Update => self.apply(action, attempts).await,
            ActionType::Delete => self.delete(action, attempts).await,
            ActionType::Noop => Ok(action.resource_id.clone()),
        }
    }

    /// Creates or updates a resource and records the result.
    async fn apply(&self, action: &PlannedAction, attempts: &mut u32) -> Result<Option<String>> {
        let name = action.resource_name.as_str();
        let spec = action
            .spec
            .as_ref()
            .ok_or_else(|| StrataError::internal(format!("No desired attributes for {name}")))?;
        let resolved = self.resolve(action, spec).await?;
        let provider = self.provider.as_ref();

        let mut record = match self.store.get(name).await? {
            Some(record) => record,
            None => {
                let record = ResourceState::new(name, &action.kind);
                self.store.put(name, &record).await?;
                record
            }
        };

        // A create must not orphan a resource that state already records.
        if action.action_type == ActionType::Create
            && record.is_live()
            && let Some(id) = &record.id
            && action.replaces.as_ref().is_none_or(|(_, old_id)| old_id != id)
        {
            warn!("Refusing to create {name}: state already records {id}");
            return Err(ExecutionError::AlreadyExists {
                resource: name.to_string(),
                id: id.clone(),
            }
            .into());
        }

        // Replacement is destroy-before-create: dependents still point at
        // the old id until their own updates run after this action.
        if let Some((old_kind, old_id)) = &action.replaces {
            info!("Replacing {name}: deleting {old_kind} {old_id}");
            let (result, n) = self
                .retry
                .run(name, self.timeout, || provider.delete(old_kind, old_id))
                .await;
            *attempts += n;
            if let Err(e) = result {
                return self.record_failure(record, e).await;
            }
            record.id = None;
            record.outputs.clear();
        }
        record.kind.clone_from(&action.kind);

        let (id, outputs) = match (action.action_type, action.resource_id.clone().or_else(|| record.id.clone())) {
            (ActionType::Update, Some(id)) => {
                let (result, n) = self
                    .retry
                    .run(name, self.timeout, || provider.update(&action.kind, &id, &resolved))
                    .await;
                *attempts += n;
                match result {
                    Ok(outputs) => (id, outputs),
                    Err(e) => return self.record_failure(record, e).await,
                }
            }
            _ => {
                let (result, n) = self
                    .retry
                    .run(name, self.timeout, || provider.create(&action.kind, &resolved))
                    .await;
                *attempts += n;
                match result {
                    Ok(created) => (created.id, created.attributes),
                    Err(e) => return self.record_failure(record, e).await,
                }
            }
        };

        record.mark_created(
            id.clone(),
            spec.symbolic_attributes(),
            action.new_hash.clone().unwrap_or_default(),
            outputs,
            action.dependencies.clone(),
        );
        self.store.put(name, &record).await?;
        info!("{} {name} ({id})", past_tense(action.action_type));
        Ok(Some(id))
    }

    /// Deletes a resource and leaves a tombstone.
    async fn delete(&self, action: &PlannedAction, attempts: &mut u32) -> Result<Option<String>> {
        let name = action.resource_name.as_str();
        let mut record = self
            .store
            .get(name)
            .await?
            .unwrap_or_else(|| ResourceState::new(name, &action.kind));

        match &action.resource_id {
            Some(id) => {
                let provider = self.provider.as_ref();
                let (result, n) = self
                    .retry
                    .run(name, self.timeout, || provider.delete(&action.kind, id))
                    .await;
                *attempts += n;
                if let Err(e) = result {
                    return self.record_failure(record, e).await;
                }
                info!("Deleted {name} ({id})");
            }
            None => debug!("{name} was never created, recording deletion only"),
        }

        record.mark_deleted();
        self.store.put(name, &record).await?;
        Ok(action.resource_id.clone())
    }

    /// Substitutes references with values read from dependency state.
    async fn resolve(&self, action: &PlannedAction, spec: &ResourceSpec) -> Result<Value> {
        let mut states: HashMap<&str, ResourceState> = HashMap::with_capacity(action.dependencies.len());
        for dep in &action.dependencies {
            if let Some(state) = self.store.get(dep).await? {
                states.insert(dep.as_str(), state);
            }
        }

        let lookup = |reference: &Reference| {
            states
                .get(reference.resource.as_str())
                .filter(|s| s.is_live())
                .and_then(|s| s.lookup(&reference.path))
        };

        let mut resolved = Map::new();
        for (key, attr) in &spec.attributes {
            let value = attr
                .resolve(&lookup)
                .map_err(|reference| ExecutionError::UnresolvedReference {
                    resource: spec.name.clone(),
                    reference: reference.to_string(),
                })?;
            resolved.insert(key.clone(), value);
        }
        Ok(Value::Object(resolved))
    }

    /// Records a failed provider call and returns the error.
    async fn record_failure(&self, mut record: ResourceState, err: StrataError) -> Result<Option<String>> {
        record.mark_failed(err.to_string());
        self.store.put(&record.name, &record).await?;
        Err(err)
    }
}

const fn past_tense(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "Created",
        ActionType::Update => "Updated",
        ActionType::Delete => "Deleted",
        ActionType::Noop => "Kept",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::ProviderError;
    use crate::graph::{Attr, GraphBuilder};
    use crate::planner::Differ;
    use crate::provider::{MockProvider, Operation, ProviderResult, ProvisionedResource, SimulatedProvider};
    use crate::state::{MemoryStateStore, ResourceStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_options() -> ExecutorOptions {
        ExecutorOptions {
            parallelism: 4,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            operation_timeout: Duration::from_secs(5),
        }
    }

    fn vpc_and_subnet() -> Vec<ResourceSpec> {
        vec![
            ResourceSpec::new("v1", "aws:ec2/vpc").with_attribute("cidr_block", Attr::String("10.0.0.0/16".into())),
            ResourceSpec::new("s1", "aws:ec2/subnet")
                .with_attribute("vpc_id", Attr::reference("v1", "id"))
                .with_attribute("cidr_block", Attr::String("10.0.1.0/24".into())),
        ]
    }

    async fn plan_for(specs: Vec<ResourceSpec>, store: &dyn StateStore) -> Plan {
        let graph = GraphBuilder::new(&Settings::new()).build(specs).expect("graph builds");
        let stored = store.list().await.expect("list");
        Differ::new().diff(&graph, &stored).expect("plan")
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_creates_in_dependency_order_and_resolves_references() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");
        assert!(report.is_success());

        let vpc = store.get("v1").await.expect("get").expect("vpc recorded");
        let subnet = store.get("s1").await.expect("get").expect("subnet recorded");
        assert_eq!(vpc.status, ResourceStatus::Created);
        assert_eq!(subnet.outputs["vpc_id"], json!(vpc.id.clone().expect("id")));
        assert_eq!(subnet.attributes["vpc_id"], json!({ "$ref": "v1.id" }));
        assert_eq!(subnet.dependencies, vec!["v1"]);

        let calls = provider.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].kind, "aws:ec2/vpc");
    }

    #[tokio::test]
    async fn test_second_run_makes_no_provider_calls() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        executor.execute(&plan, no_cancel()).await.expect("first run");

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        assert!(plan.is_empty());
        let report = executor.execute(&plan, no_cancel()).await.expect("second run");
        assert!(report.is_success());
        assert_eq!(provider.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = Arc::new(SimulatedProvider::new());
        provider
            .inject_failure("aws:ec2/vpc", ProviderError::transient("throttled"))
            .await;
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");

        assert!(report.is_success());
        assert_eq!(report.node("v1").expect("node").attempts, 2);
        assert_eq!(report.node("s1").expect("node").attempts, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_dependents() {
        let provider = Arc::new(SimulatedProvider::new());
        provider
            .inject_failure("aws:ec2/vpc", ProviderError::permanent("invalid cidr_block"))
            .await;
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let mut specs = vpc_and_subnet();
        specs.push(ResourceSpec::new("bucket", "aws:s3/bucket"));
        let plan = plan_for(specs, store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");

        assert_eq!(report.node("v1").expect("node").status, NodeStatus::Failed);
        assert_eq!(report.node("v1").expect("node").attempts, 1);
        assert_eq!(report.node("s1").expect("node").status, NodeStatus::Skipped);
        assert_eq!(report.node("bucket").expect("node").status, NodeStatus::Succeeded);

        let failed = store.get("v1").await.expect("get").expect("failure recorded");
        assert_eq!(failed.status, ResourceStatus::Failed);
        assert!(failed.error.is_some_and(|e| e.contains("invalid cidr_block")));
        assert!(store.get("s1").await.expect("get").is_none());
        assert!(provider.calls().await.iter().all(|c| c.kind != "aws:ec2/subnet"));

        assert!(matches!(
            report.into_result(),
            Err(StrataError::Execution(ExecutionError::RunFailed { failed: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_node() {
        let provider = Arc::new(SimulatedProvider::new());
        for _ in 0..3 {
            provider
                .inject_failure("aws:ec2/vpc", ProviderError::transient("throttled"))
                .await;
        }
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider, store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");

        let node = report.node("v1").expect("node");
        assert_eq!(node.status, NodeStatus::Failed);
        assert_eq!(node.attempts, 3);
        assert!(node.error.as_deref().is_some_and(|e| e.contains("Maximum retry attempts (3)")));
    }

    #[tokio::test]
    async fn test_cancel_before_start_dispatches_nothing() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        let (_tx, rx) = watch::channel(true);
        let report = executor.execute(&plan, rx).await.expect("run");

        assert!(report.cancelled);
        assert_eq!(report.count(NodeStatus::Pending), 2);
        assert!(provider.calls().await.is_empty());
        assert!(matches!(
            report.into_result(),
            Err(StrataError::Execution(ExecutionError::Cancelled { pending: 2 }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_action_finish() {
        let (tx, rx) = watch::channel(false);
        let mut provider = MockProvider::new();
        provider.expect_create().times(1).returning(move |_, _| {
            let _ = tx.send(true);
            Ok(ProvisionedResource {
                id: String::from("x-1"),
                attributes: Map::new(),
            })
        });
        provider.expect_provider_type().return_const("mock");

        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(Arc::new(provider), store.clone(), fast_options().with_parallelism(1));

        let specs = vec![ResourceSpec::new("a", "k"), ResourceSpec::new("b", "k")];
        let plan = plan_for(specs, store.as_ref()).await;
        let report = executor.execute(&plan, rx).await.expect("run");

        assert!(report.cancelled);
        assert_eq!(report.node("a").expect("node").status, NodeStatus::Succeeded);
        assert_eq!(report.node("b").expect("node").status, NodeStatus::Pending);
        let a = store.get("a").await.expect("get").expect("recorded");
        assert_eq!(a.id.as_deref(), Some("x-1"));
    }

    #[tokio::test]
    async fn test_update_uses_existing_id() {
        let mut provider = MockProvider::new();
        provider
            .expect_update()
            .withf(|kind, id, attrs| kind == "aws:ec2/vpc" && id == "vpc-1" && attrs["cidr_block"] == json!("10.1.0.0/16"))
            .times(1)
            .returning(|_, _, attrs| Ok(attrs.as_object().cloned().unwrap_or_default()));
        provider.expect_provider_type().return_const("mock");

        let mut existing = ResourceState::new("v1", "aws:ec2/vpc");
        existing.mark_created(
            String::from("vpc-1"),
            json!({ "cidr_block": "10.0.0.0/16" }),
            String::new(),
            Map::new(),
            Vec::new(),
        );
        let store = Arc::new(MemoryStateStore::with_states([existing]));
        let executor = Executor::new(Arc::new(provider), store.clone(), fast_options());

        let spec = ResourceSpec::new("v1", "aws:ec2/vpc").with_attribute("cidr_block", Attr::String("10.1.0.0/16".into()));
        let plan = plan_for(vec![spec], store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");

        assert!(report.is_success());
        let record = store.get("v1").await.expect("get").expect("recorded");
        assert_eq!(record.id.as_deref(), Some("vpc-1"));
        assert_eq!(record.attributes, json!({ "cidr_block": "10.1.0.0/16" }));
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted_after_dependents() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        executor.execute(&plan, no_cancel()).await.expect("create");

        let plan = plan_for(Vec::new(), store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("destroy");
        assert!(report.is_success());

        let deletes: Vec<String> = provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.operation == Operation::Delete)
            .map(|c| c.kind)
            .collect();
        assert_eq!(deletes, vec!["aws:ec2/subnet", "aws:ec2/vpc"]);
        assert_eq!(provider.resource_count().await, 0);

        let vpc = store.get("v1").await.expect("get").expect("tombstone");
        assert_eq!(vpc.status, ResourceStatus::Deleted);
    }

    #[tokio::test]
    async fn test_kind_change_deletes_old_before_creating_new() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());
        let app = || ResourceSpec::new("app", "aws:ec2/instance").with_attribute("db", Attr::reference("db", "id"));

        let plan = plan_for(vec![ResourceSpec::new("db", "aws:rds/instance"), app()], store.as_ref()).await;
        executor.execute(&plan, no_cancel()).await.expect("create");
        let old_id = store.get("db").await.expect("get").and_then(|s| s.id).expect("id");
        let before = provider.calls().await.len();

        let plan = plan_for(vec![ResourceSpec::new("db", "aws:rds/cluster"), app()], store.as_ref()).await;
        assert_eq!(plan.action("app").map(|a| a.action_type), Some(ActionType::Update));
        let report = executor.execute(&plan, no_cancel()).await.expect("replace");
        assert!(report.is_success());

        let record = store.get("db").await.expect("get").expect("recorded");
        assert_eq!(record.kind, "aws:rds/cluster");
        let new_id = record.id.expect("new id");
        assert_ne!(new_id, old_id);
        assert!(provider.resource(&old_id).await.is_none());

        // The old resource is gone before its replacement and the dependent
        // update both run.
        let calls: Vec<(Operation, String)> = provider.calls().await[before..]
            .iter()
            .map(|c| (c.operation, c.kind.clone()))
            .collect();
        assert_eq!(
            calls,
            vec![
                (Operation::Delete, String::from("aws:rds/instance")),
                (Operation::Create, String::from("aws:rds/cluster")),
                (Operation::Update, String::from("aws:ec2/instance")),
            ]
        );
        let app = store.get("app").await.expect("get").expect("recorded");
        assert_eq!(app.outputs["db"], json!(new_id));
    }

    #[tokio::test]
    async fn test_same_plan_executed_twice_creates_once() {
        let provider = Arc::new(SimulatedProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options());

        let plan = plan_for(vpc_and_subnet(), store.as_ref()).await;
        assert!(executor.execute(&plan, no_cancel()).await.expect("first run").is_success());
        let vpc_id = store.get("v1").await.expect("get").and_then(|s| s.id);

        let report = executor.execute(&plan, no_cancel()).await.expect("second run");
        assert_eq!(report.node("v1").expect("node").status, NodeStatus::Failed);
        assert!(
            report
                .node("v1")
                .and_then(|n| n.error.as_deref())
                .is_some_and(|e| e.contains("already records"))
        );
        assert_eq!(report.node("s1").expect("node").status, NodeStatus::Skipped);

        assert_eq!(provider.resource_count().await, 2);
        assert_eq!(provider.calls().await.len(), 2);
        let vpc = store.get("v1").await.expect("get").expect("recorded");
        assert_eq!(vpc.status, ResourceStatus::Created);
        assert_eq!(vpc.id, vpc_id);
    }

    /// Records how many creates are in flight at once.
    #[derive(Default)]
    struct OverlapProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        created: AtomicUsize,
    }

    #[async_trait]
    impl Provider for OverlapProvider {
        async fn create(&self, _kind: &str, _attributes: &Value) -> ProviderResult<ProvisionedResource> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionedResource {
                id: format!("r-{n}"),
                attributes: Map::new(),
            })
        }

        async fn update(&self, _kind: &str, _id: &str, _attributes: &Value) -> ProviderResult<Map<String, Value>> {
            Ok(Map::new())
        }

        async fn delete(&self, _kind: &str, _id: &str) -> ProviderResult<()> {
            Ok(())
        }

        fn provider_type(&self) -> &'static str {
            "overlap"
        }
    }

    async fn peak_in_flight(specs: Vec<ResourceSpec>, parallelism: usize) -> usize {
        let provider = Arc::new(OverlapProvider::default());
        let store = Arc::new(MemoryStateStore::new());
        let executor = Executor::new(provider.clone(), store.clone(), fast_options().with_parallelism(parallelism));

        let plan = plan_for(specs, store.as_ref()).await;
        let report = executor.execute(&plan, no_cancel()).await.expect("run");
        assert!(report.is_success());
        assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
        provider.peak.load(Ordering::SeqCst)
    }

    fn independent(count: usize) -> Vec<ResourceSpec> {
        (0..count).map(|i| ResourceSpec::new(format!("bucket-{i}"), "aws:s3/bucket")).collect()
    }

    #[tokio::test]
    async fn test_in_flight_actions_capped_at_parallelism() {
        assert_eq!(peak_in_flight(independent(6), 2).await, 2);
        assert_eq!(peak_in_flight(independent(6), 4).await, 4);
        assert_eq!(peak_in_flight(independent(6), 1).await, 1);
    }

    #[tokio::test]
    async fn test_independent_nodes_overlap_and_chains_do_not() {
        assert_eq!(peak_in_flight(independent(3), 8).await, 3);

        let chain = vec![
            ResourceSpec::new("a", "k"),
            ResourceSpec::new("b", "k").with_attribute("up", Attr::reference("a", "id")),
            ResourceSpec::new("c", "k").with_attribute("up", Attr::reference("b", "id")),
        ];
        assert_eq!(peak_in_flight(chain, 8).await, 1);
    }
}
