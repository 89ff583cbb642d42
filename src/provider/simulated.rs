//! In-memory simulated provider.
//!
//! Behaves like a small cloud: it assigns identifiers, echoes the requested
//! attributes back with a few computed ones, and lets callers queue failures
//! per resource kind. Used for dry runs and throughout the tests.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;

use super::api::{Provider, ProviderResult, ProvisionedResource};

/// Operation recorded by the simulated provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `create` call.
    Create,
    /// `update` call.
    Update,
    /// `delete` call.
    Delete,
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// What was called.
    pub operation: Operation,
    /// Resource kind.
    pub kind: String,
    /// Identifier, for update and delete.
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct Cloud {
    resources: HashMap<String, (String, Map<String, Value>)>,
    failures: HashMap<String, VecDeque<ProviderError>>,
    calls: Vec<ProviderCall>,
    next_address: u32,
}

/// Simulated in-memory provider.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    cloud: Mutex<Cloud>,
    latency: Option<Duration>,
}

impl SimulatedProvider {
    /// Creates an empty simulated cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues an error returned by the next call for `kind`.
    pub async fn inject_failure(&self, kind: &str, error: ProviderError) {
        self.cloud
            .lock()
            .await
            .failures
            .entry(kind.to_string())
            .or_default()
            .push_back(error);
    }

    /// Returns every call made so far.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.cloud.lock().await.calls.clone()
    }

    /// Returns the number of live resources.
    pub async fn resource_count(&self) -> usize {
        self.cloud.lock().await.resources.len()
    }

    /// Returns the stored attributes of a live resource.
    pub async fn resource(&self, id: &str) -> Option<Map<String, Value>> {
        self.cloud.lock().await.resources.get(id).map(|(_, attrs)| attrs.clone())
    }

    /// Records the call and pops a queued failure, if any.
    async fn begin(&self, operation: Operation, kind: &str, id: Option<&str>) -> ProviderResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut cloud = self.cloud.lock().await;
        cloud.calls.push(ProviderCall {
            operation,
            kind: kind.to_string(),
            id: id.map(str::to_string),
        });

        match cloud.failures.get_mut(kind).and_then(VecDeque::pop_front) {
            Some(error) => {
                debug!("Simulated {operation:?} of {kind} fails: {error}");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

/// Derives an identifier prefix from a kind such as `aws:ec2/securityGroup`.
fn id_prefix(kind: &str) -> String {
    let short = kind.rsplit(|c: char| c == '/' || c == ':').next().unwrap_or(kind);
    match short {
        "instance" => String::from("i"),
        "securityGroup" => String::from("sg"),
        other => other.to_ascii_lowercase(),
    }
}

fn is_instance(kind: &str) -> bool {
    kind.ends_with("/instance")
}

/// Echoes the requested attributes and adds the computed ones.
fn actual_attributes(kind: &str, id: &str, requested: &Value, address: Option<u32>) -> Map<String, Value> {
    let mut actual = match requested {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    actual.insert(String::from("id"), Value::String(id.to_string()));
    actual.insert(String::from("arn"), Value::String(format!("arn:sim:{kind}:{id}")));

    if let Some(n) = address {
        let (hi, lo) = (n / 250, n % 250 + 1);
        actual.insert(String::from("public_ip"), Value::String(format!("203.0.{}.{lo}", 113 + hi)));
        actual.insert(
            String::from("public_dns"),
            Value::String(format!("ec2-203-0-{}-{lo}.compute-1.amazonaws.com", 113 + hi)),
        );
    }
    actual
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn create(&self, kind: &str, attributes: &Value) -> ProviderResult<ProvisionedResource> {
        self.begin(Operation::Create, kind, None).await?;

        let id = format!("{}-{}", id_prefix(kind), &Uuid::new_v4().simple().to_string()[..8]);

        let mut cloud = self.cloud.lock().await;
        let address = is_instance(kind).then(|| {
            let n = cloud.next_address;
            cloud.next_address += 1;
            n
        });
        let actual = actual_attributes(kind, &id, attributes, address);
        cloud.resources.insert(id.clone(), (kind.to_string(), actual.clone()));

        debug!("Simulated create of {kind}: {id}");
        Ok(ProvisionedResource { id, attributes: actual })
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Value) -> ProviderResult<Map<String, Value>> {
        self.begin(Operation::Update, kind, Some(id)).await?;

        let mut cloud = self.cloud.lock().await;
        let previous = cloud.resources.get(id).map(|(_, attrs)| attrs.clone());

        let mut actual = actual_attributes(kind, id, attributes, None);
        if let Some(previous) = previous {
            for key in ["public_ip", "public_dns"] {
                if let Some(value) = previous.get(key) {
                    actual.insert(key.to_string(), value.clone());
                }
            }
        }
        cloud.resources.insert(id.to_string(), (kind.to_string(), actual.clone()));

        debug!("Simulated update of {kind}: {id}");
        Ok(actual)
    }

    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()> {
        self.begin(Operation::Delete, kind, Some(id)).await?;
        self.cloud.lock().await.resources.remove(id);
        debug!("Simulated delete of {kind}: {id}");
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        "simulated"
    }
}
