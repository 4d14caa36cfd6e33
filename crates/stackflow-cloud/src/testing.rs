//! In-memory provider for tests
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for dependent crates.

use crate::error::{CloudError, Result};
use crate::graph::{Params, ResourceKind};
use crate::provider::{
    AuthStatus, CloudProvider, CreateRequest, CreatedResource, ResourceDescription,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One call received by [`MemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { name: String },
    Describe { name: String },
    Delete { name: String },
}

#[derive(Debug, Clone)]
struct Stored {
    name: String,
    kind: ResourceKind,
    params: Params,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    resources: BTreeMap<String, Stored>,
    calls: Vec<Call>,
    create_failures: HashMap<String, VecDeque<CloudError>>,
    delete_failures: HashMap<String, VecDeque<CloudError>>,
}

impl Inner {
    fn id_of(&self, name: &str) -> Option<String> {
        self.resources
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| id.clone())
    }

    fn name_of(&self, id: &str) -> String {
        self.resources
            .get(id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Cloud double that keeps resources in memory and logs every call
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every create call take `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues errors returned by the next create calls for `name`
    pub fn fail_create(&self, name: &str, errors: impl IntoIterator<Item = CloudError>) {
        self.inner()
            .create_failures
            .entry(name.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queues errors returned by the next delete calls for `name`
    pub fn fail_delete(&self, name: &str, errors: impl IntoIterator<Item = CloudError>) {
        self.inner()
            .delete_failures
            .entry(name.to_string())
            .or_default()
            .extend(errors);
    }

    /// Changes a live parameter behind the engine's back
    pub fn tamper(&self, name: &str, key: &str, value: serde_json::Value) {
        let mut inner = self.inner();
        if let Some(id) = inner.id_of(name)
            && let Some(resource) = inner.resources.get_mut(&id)
        {
            resource.params.insert(key.to_string(), value);
        }
    }

    /// Deletes a resource behind the engine's back
    pub fn remove_out_of_band(&self, name: &str) {
        let mut inner = self.inner();
        if let Some(id) = inner.id_of(name) {
            inner.resources.remove(&id);
        }
    }

    pub fn external_id(&self, name: &str) -> Option<String> {
        self.inner().id_of(name)
    }

    pub fn live_params(&self, name: &str) -> Option<Params> {
        let inner = self.inner();
        let id = inner.id_of(name)?;
        inner.resources.get(&id).map(|r| r.params.clone())
    }

    pub fn resource_count(&self) -> usize {
        self.inner().resources.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner().calls.clear();
    }

    /// Logical names of all create calls, including failed attempts
    pub fn creates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Logical names of all delete calls, including failed attempts
    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Highest number of create calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Network => "vpc",
        ResourceKind::Subnet => "subnet",
        ResourceKind::SecurityGroup => "sg",
        ResourceKind::LaunchTemplate => "lt",
        ResourceKind::AutoscalingGroup => "asg",
        ResourceKind::LoadBalancer => "lb",
        ResourceKind::TargetGroup => "tg",
        ResourceKind::Listener => "listener",
        ResourceKind::Route => "rule",
        ResourceKind::InternetGateway => "igw",
        ResourceKind::RouteTable => "rtb",
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn display_name(&self) -> &str {
        "In-memory"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("memory"))
    }

    async fn create(&self, request: &CreateRequest) -> Result<CreatedResource> {
        {
            let mut inner = self.inner();
            inner.calls.push(Call::Create {
                name: request.logical_name.clone(),
            });
            if let Some(err) = inner
                .create_failures
                .get_mut(&request.logical_name)
                .and_then(|q| q.pop_front())
            {
                return Err(err);
            }
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut inner = self.inner();
        inner.next_id += 1;
        let id = format!("{}-{:04}", id_prefix(request.kind), inner.next_id);
        inner.resources.insert(
            id.clone(),
            Stored {
                name: request.logical_name.clone(),
                kind: request.kind,
                params: request.params.clone(),
            },
        );

        let mut created = CreatedResource::new(&id);
        if request.kind == ResourceKind::LoadBalancer {
            created = created.with_attribute(
                "dns_name",
                format!("{}.elb.memory.internal", request.logical_name),
            );
        }
        Ok(created)
    }

    async fn describe(&self, kind: ResourceKind, external_id: &str) -> Result<ResourceDescription> {
        let mut inner = self.inner();
        let name = inner.name_of(external_id);
        inner.calls.push(Call::Describe { name });
        Ok(match inner.resources.get(external_id) {
            Some(resource) if resource.kind == kind => {
                ResourceDescription::available().with_params(resource.params.clone())
            }
            _ => ResourceDescription::missing(),
        })
    }

    async fn delete(&self, _kind: ResourceKind, external_id: &str) -> Result<()> {
        let mut inner = self.inner();
        let name = inner.name_of(external_id);
        inner.calls.push(Call::Delete { name: name.clone() });
        if let Some(err) = inner
            .delete_failures
            .get_mut(&name)
            .and_then(|q| q.pop_front())
        {
            return Err(err);
        }
        inner
            .resources
            .remove(external_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(external_id.to_string()))
    }
}
