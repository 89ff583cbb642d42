//! End-to-end reconciliation scenarios against the simulated provider.

use std::sync::Arc;

use serde_json::{Value, json};
use strata::config::{ConfigParser, ConfigValidator, StackConfig};
use strata::error::{GraphError, ProviderError, StrataError};
use strata::planner::{ActionType, ExecutorOptions, NodeStatus};
use strata::provider::SimulatedProvider;
use strata::reconciler::Reconciler;
use strata::state::{LocalStateStore, MemoryStateStore, ResourceStatus, StateStore};
use tokio::sync::watch;

const TEMPLATE: &str = include_str!("../templates/strata.yaml");

fn template() -> StackConfig {
    let mut config = ConfigParser::new().parse_yaml(TEMPLATE, None).expect("template parses");
    ConfigParser::apply_overrides(
        &mut config,
        &[(String::from("STRATA_SETTING_SSH_KEY_NAME"), String::from("ops"))],
    );
    config
}

fn stack(yaml: &str) -> StackConfig {
    ConfigParser::new().parse_yaml(yaml, None).expect("stack parses")
}

fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn test_template_cluster_converges() {
    let config = template();
    ConfigValidator::new().validate(&config).expect("template is valid");

    let store = Arc::new(MemoryStateStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    let reconciler = Reconciler::new(&config, store.clone(), provider.clone());

    let plan = reconciler.plan().await.expect("plan");
    assert_eq!(plan.summary().creates, 6);
    assert_eq!(plan.actions[0].resource_name, "vpc");

    let result = reconciler.apply(&plan, no_cancel()).await.expect("apply");
    assert!(result.is_success(), "{result}");

    let ips = &result.outputs[0].values;
    assert_eq!(ips.len(), 3);
    assert!(ips.iter().all(Value::is_string));
    assert_ne!(ips[0], ips[1]);

    // References were resolved to provider ids before the call.
    let subnet = store.get("public-subnet").await.expect("get").expect("subnet stored");
    let instance = store.get("instance-2").await.expect("get").expect("instance stored");
    assert_eq!(instance.outputs["subnet_id"], json!(subnet.id));
    assert_eq!(instance.outputs["key_name"], json!("ops"));
    assert_eq!(instance.outputs["tags"], json!({ "Name": "worker-1" }));
    assert!(instance.dependencies.contains(&String::from("web-sg")));

    let calls = provider.calls().await.len();
    let plan = reconciler.plan().await.expect("second plan");
    assert!(plan.is_empty());
    let result = reconciler.apply(&plan, no_cancel()).await.expect("noop apply");
    assert!(result.is_success());
    assert_eq!(provider.calls().await.len(), calls);
}

#[tokio::test]
async fn test_reordered_ingress_rules_plan_update() {
    let config = template();
    let store = Arc::new(MemoryStateStore::new());
    let reconciler = Reconciler::new(&config, store.clone(), Arc::new(SimulatedProvider::new()));
    let plan = reconciler.plan().await.expect("plan");
    reconciler.apply(&plan, no_cancel()).await.expect("apply");

    let mut reordered = template();
    let sg = reordered
        .resources
        .iter_mut()
        .find(|r| r.name == "web-sg")
        .expect("web-sg declared");
    if let Some(Value::Array(rules)) = sg.attributes.get_mut("ingress") {
        rules.reverse();
    }

    let reconciler = Reconciler::new(&reordered, store, Arc::new(SimulatedProvider::new()));
    let plan = reconciler.plan().await.expect("plan");
    let action = plan.action("web-sg").expect("web-sg planned");
    assert_eq!(action.action_type, ActionType::Update);
    assert_eq!(action.changes, vec![String::from("ingress")]);
    assert_eq!(plan.summary().updates, 1);
}

#[tokio::test]
async fn test_cycle_rejected_before_any_provider_call() {
    let config = stack(
        r"
project:
  name: loop
resources:
  - name: a
    kind: test:thing
    attributes:
      peer: { $ref: b.id }
  - name: b
    kind: test:thing
    attributes:
      peer: { $ref: a.id }
",
    );
    let provider = Arc::new(SimulatedProvider::new());
    let reconciler = Reconciler::new(&config, Arc::new(MemoryStateStore::new()), provider.clone());

    let err = reconciler.plan().await.unwrap_err();
    match err {
        StrataError::Graph(GraphError::CyclicDependency { cycle }) => {
            assert!(cycle.contains(&String::from("a")));
            assert!(cycle.contains(&String::from("b")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(provider.calls().await.is_empty());
}

#[tokio::test]
async fn test_failed_resource_skips_only_its_dependents() {
    let config = stack(
        r"
project:
  name: partial
execution:
  initial_backoff_ms: 1
  max_backoff_ms: 5
resources:
  - name: vpc
    kind: aws:ec2/vpc
    attributes:
      cidr_block: 10.0.0.0/16
  - name: subnet
    kind: aws:ec2/subnet
    attributes:
      vpc_id: { $ref: vpc.id }
  - name: logs
    kind: aws:s3/bucket
    attributes:
      acl: private
",
    );
    let store = Arc::new(MemoryStateStore::new());
    let provider = Arc::new(SimulatedProvider::new());
    provider
        .inject_failure("aws:ec2/vpc", ProviderError::permanent("invalid cidr"))
        .await;

    let reconciler = Reconciler::new(&config, store.clone(), provider);
    let plan = reconciler.plan().await.expect("plan");
    let result = reconciler.apply(&plan, no_cancel()).await.expect("apply");

    assert!(!result.is_success());
    let status = |name: &str| result.report.node(name).map(|n| n.status);
    assert_eq!(status("vpc"), Some(NodeStatus::Failed));
    assert_eq!(status("subnet"), Some(NodeStatus::Skipped));
    assert_eq!(status("logs"), Some(NodeStatus::Succeeded));
    assert!(result.report.into_result().is_err());

    let vpc = store.get("vpc").await.expect("get").expect("failure recorded");
    assert_eq!(vpc.status, ResourceStatus::Failed);
    assert!(vpc.error.is_some_and(|e| e.contains("invalid cidr")));

    // The next run retries the failed resource and its dependent.
    let plan = reconciler.plan().await.expect("replan");
    assert_eq!(plan.action("vpc").map(|a| a.action_type), Some(ActionType::Create));
    assert_eq!(plan.action("subnet").map(|a| a.action_type), Some(ActionType::Create));
    assert_eq!(plan.action("logs").map(|a| a.action_type), Some(ActionType::Noop));
}

#[tokio::test]
async fn test_local_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = template();

    {
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path()));
        let reconciler = Reconciler::new(&config, store, Arc::new(SimulatedProvider::new()));
        let plan = reconciler.plan().await.expect("plan");
        let result = reconciler.apply(&plan, no_cancel()).await.expect("apply");
        assert!(result.is_success());
    }

    let store = Arc::new(LocalStateStore::with_base_dir(dir.path()));
    assert_eq!(store.list().await.expect("list").len(), 6);
    assert!(!store.is_locked().await.expect("lock info"));

    let reconciler = Reconciler::new(&config, store, Arc::new(SimulatedProvider::new()));
    assert!(reconciler.plan().await.expect("plan").is_empty());

    let outputs = reconciler.outputs().await.expect("outputs");
    assert_eq!(outputs[1].name, "instance_dns");
    assert!(outputs[1].values.iter().all(Value::is_string));
}

#[tokio::test]
async fn test_independent_nodes_converge_regardless_of_parallelism() {
    let config = stack(
        r"
project:
  name: pair
resources:
  - name: left
    kind: aws:s3/bucket
    attributes:
      acl: private
      tags: { Side: left }
  - name: right
    kind: aws:s3/bucket
    attributes:
      acl: private
      tags: { Side: right }
",
    );

    let mut finals = Vec::new();
    for parallelism in [1, 2] {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(SimulatedProvider::new().with_latency(std::time::Duration::from_millis(2)));
        let reconciler = Reconciler::new(&config, store.clone(), provider)
            .with_options(ExecutorOptions::default().with_parallelism(parallelism));
        let plan = reconciler.plan().await.expect("plan");
        assert!(reconciler.apply(&plan, no_cancel()).await.expect("apply").is_success());

        let contents: Vec<_> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|s| (s.name, s.status, s.attributes, s.attributes_hash))
            .collect();
        finals.push(contents);
    }

    assert_eq!(finals[0].len(), 2);
    assert_eq!(finals[0], finals[1]);
}
