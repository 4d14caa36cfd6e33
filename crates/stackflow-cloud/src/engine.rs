//! Execution engine
//!
//! Walks an [`ExecutionPlan`] and realizes every node through a
//! [`CloudProvider`], consulting the [`Ledger`] so reruns are idempotent
//! and resumable.
//!
//! Independent branches run concurrently on a bounded worker pool; a node is
//! started only after every dependency completed in the current run. The
//! first permanent failure stops scheduling, lets in-flight workers finish
//! and record their results, and is reported together with the completed
//! and pending names.

use crate::action::{Action, ActionType, ApplyReport, Plan};
use crate::error::{
    DriftError, Operation, PartialCompletionError, ProvisionError, ProvisionFailure, StackError,
    StackResult,
};
use crate::fingerprint::{ResolvedOutput, ResolvedOutputs, fingerprint, resolve_params};
use crate::graph::{Params, ResourceGraph, ResourceKind, ResourceNode};
use crate::provider::{CloudProvider, CreateRequest, LiveStatus, ResourceDescription};
use crate::resolver::{self, ExecutionPlan};
use crate::retry::{RetryConfig, RetryError, with_retry};
use crate::state::{Ledger, ProvisioningRecord, RecordStatus};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What to do when a recorded resource no longer matches the graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Stop with a drift error
    #[default]
    Fail,
    /// Delete and recreate the resource when nothing depends on it
    Replace,
}

impl std::fmt::Display for ReplacePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacePolicy::Fail => write!(f, "fail"),
            ReplacePolicy::Replace => write!(f, "replace"),
        }
    }
}

impl std::str::FromStr for ReplacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(ReplacePolicy::Fail),
            "replace" => Ok(ReplacePolicy::Replace),
            other => Err(format!(
                "unknown replace policy '{}' (expected 'fail' or 'replace')",
                other
            )),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub retry: RetryConfig,

    /// Maximum number of nodes realized at the same time
    pub concurrency: usize,

    pub replace_policy: ReplacePolicy,

    /// Describe reused resources to detect out-of-band changes
    pub refresh: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            concurrency: 4,
            replace_policy: ReplacePolicy::Fail,
            refresh: true,
        }
    }
}

/// Provisioning orchestrator
pub struct Engine {
    provider: Arc<dyn CloudProvider>,
    ledger: Arc<Ledger>,
    options: EngineOptions,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(provider: Arc<dyn CloudProvider>, ledger: Arc<Ledger>) -> Self {
        Self {
            provider,
            ledger,
            options: EngineOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that stops scheduling new nodes when cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn worker(&self) -> Worker {
        Worker {
            provider: self.provider.clone(),
            ledger: self.ledger.clone(),
            retry: self.options.retry.clone(),
            policy: self.options.replace_policy,
            refresh: self.options.refresh,
            cancel: self.cancel.clone(),
        }
    }

    /// Validates the graph and orders it
    pub fn resolve(&self, graph: &ResourceGraph) -> StackResult<ExecutionPlan> {
        graph.validate()?;
        Ok(resolver::resolve(graph)?)
    }

    /// Describes what [`Engine::apply`] would do, without calling the provider
    pub async fn preview(&self, graph: &ResourceGraph) -> StackResult<Plan> {
        let plan = self.resolve(graph)?;
        let mut outputs = ResolvedOutputs::new();
        let mut unknown: HashSet<String> = HashSet::new();
        let mut actions = Vec::with_capacity(plan.len());

        for node in plan.steps() {
            let record = self.ledger.get(&node.name).await;
            let waiting: Vec<String> = node
                .dependencies()
                .into_iter()
                .filter(|d| unknown.contains(d))
                .collect();

            let resolved = if waiting.is_empty() {
                resolve_params(node, &outputs).map_err(|failure| failure.to_string())
            } else {
                Err(format!("waits for {}", waiting.join(", ")))
            };

            let params = match resolved {
                Ok(params) => params,
                Err(reason) => {
                    let mut action = Action::new(&node.name, node.kind, ActionType::Pending)
                        .with_reason(reason);
                    if let Some(record) = &record {
                        action = action.with_external_id(&record.external_id);
                    }
                    unknown.insert(node.name.clone());
                    actions.push(action);
                    continue;
                }
            };

            let fp = fingerprint(node.kind, &params);
            let action = match record {
                None => {
                    unknown.insert(node.name.clone());
                    Action::new(&node.name, node.kind, ActionType::Create)
                }
                Some(record) => match drift_reason(&record, &fp) {
                    None => {
                        outputs.insert(node.name.clone(), record.output());
                        Action::new(&node.name, node.kind, ActionType::NoOp)
                            .with_external_id(&record.external_id)
                    }
                    Some(reason) => {
                        unknown.insert(node.name.clone());
                        let action_type = match self.options.replace_policy {
                            ReplacePolicy::Fail => ActionType::Conflict,
                            ReplacePolicy::Replace => ActionType::Replace,
                        };
                        Action::new(&node.name, node.kind, action_type)
                            .with_external_id(&record.external_id)
                            .with_reason(reason)
                    }
                },
            };
            actions.push(action.with_fingerprint(fp));
        }

        for record in self.ledger.list().await {
            if !graph.contains(&record.logical_name) {
                actions.push(
                    Action::new(&record.logical_name, record.kind, ActionType::Orphan)
                        .with_external_id(&record.external_id)
                        .with_reason("recorded but not declared in the graph"),
                );
            }
        }

        Ok(Plan::new(actions))
    }

    /// Describes what [`Engine::destroy`] would delete, in deletion order
    pub async fn preview_destroy(&self, graph: &ResourceGraph) -> StackResult<Plan> {
        let actions = self
            .teardown_targets(graph)
            .await
            .into_iter()
            .map(|record| {
                Action::new(&record.logical_name, record.kind, ActionType::Delete)
                    .with_external_id(&record.external_id)
                    .with_fingerprint(&record.fingerprint)
            })
            .collect();
        Ok(Plan::new(actions))
    }

    /// Drives the graph to existence
    pub async fn apply(&self, graph: &ResourceGraph) -> StackResult<ApplyReport> {
        let started = Instant::now();
        let plan = self.resolve(graph)?;
        let steps = plan.steps();
        let concurrency = self.options.concurrency.max(1);

        let mut report = ApplyReport::new();
        let mut outputs = ResolvedOutputs::new();
        let mut started_names: HashSet<String> = HashSet::new();
        let mut workers: JoinSet<(String, StackResult<Outcome>)> = JoinSet::new();
        let mut failure: Option<(String, StackError)> = None;
        let mut cancelled = false;

        tracing::info!(
            nodes = steps.len(),
            concurrency,
            provider = self.provider.name(),
            "Applying resource graph"
        );

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                tracing::warn!("Cancellation requested, waiting for in-flight resources");
                cancelled = true;
            }

            if failure.is_none() && !cancelled {
                for node in steps {
                    if workers.len() >= concurrency {
                        break;
                    }
                    if started_names.contains(&node.name)
                        || !node.dependencies().iter().all(|d| outputs.contains_key(d))
                    {
                        continue;
                    }
                    started_names.insert(node.name.clone());

                    let params = match resolve_params(node, &outputs) {
                        Ok(params) => params,
                        Err(failure_kind) => {
                            let err = ProvisionError {
                                name: node.name.clone(),
                                kind: node.kind,
                                operation: Operation::Resolve,
                                attempts: 0,
                                failure: failure_kind,
                            };
                            failure = Some((node.name.clone(), err.into()));
                            break;
                        }
                    };

                    let worker = self.worker();
                    let node = node.clone();
                    workers.spawn(async move {
                        let name = node.name.clone();
                        (name, worker.realize(node, params).await)
                    });
                }
            }

            if workers.is_empty() {
                break;
            }

            let joined = if cancelled {
                workers.join_next().await
            } else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => continue,
                    joined = workers.join_next() => joined,
                }
            };

            let Some(joined) = joined else { break };
            let (name, result) = match joined {
                Ok(value) => value,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => continue,
            };

            match result {
                Ok(outcome) => {
                    let (output, list) = match outcome {
                        Outcome::Created(o) => (o, &mut report.created),
                        Outcome::Reused(o) => (o, &mut report.reused),
                        Outcome::Replaced(o) => (o, &mut report.replaced),
                    };
                    list.push(name.clone());
                    outputs.insert(name, output);
                }
                Err(err) if cancelled && is_cancellation(&err) => {
                    tracing::debug!(name = %name, "Worker stopped by cancellation");
                }
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "Resource failed");
                    if failure.is_none() {
                        failure = Some((name, err));
                    }
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        let completed: Vec<String> = steps
            .iter()
            .filter(|n| outputs.contains_key(&n.name))
            .map(|n| n.name.clone())
            .collect();
        let pending: Vec<String> = steps
            .iter()
            .filter(|n| !outputs.contains_key(&n.name))
            .map(|n| n.name.clone())
            .collect();

        if let Some((failed, err)) = failure {
            return Err(partial_or_root(completed, pending, failed, err));
        }
        if !pending.is_empty() {
            return Err(PartialCompletionError {
                completed,
                pending,
                failed: None,
                source: None,
            }
            .into());
        }

        tracing::info!(
            created = report.created.len(),
            reused = report.reused.len(),
            replaced = report.replaced.len(),
            duration_ms = report.duration_ms,
            "Apply complete"
        );
        Ok(report)
    }

    /// Recorded nodes of the graph, newest first
    async fn teardown_targets(&self, graph: &ResourceGraph) -> Vec<ProvisioningRecord> {
        let mut records: Vec<_> = self
            .ledger
            .list()
            .await
            .into_iter()
            .filter(|r| graph.contains(&r.logical_name))
            .collect();
        records.reverse();
        records
    }

    /// Deletes the graph's recorded resources in reverse creation order.
    ///
    /// A resource that any remaining record depends on is not deleted; the
    /// teardown stops there.
    pub async fn destroy(&self, graph: &ResourceGraph) -> StackResult<ApplyReport> {
        let started = Instant::now();
        let targets = self.teardown_targets(graph).await;
        let worker = self.worker();
        let mut report = ApplyReport::new();

        tracing::info!(
            records = targets.len(),
            provider = self.provider.name(),
            "Destroying resource graph"
        );

        for (i, record) in targets.iter().enumerate() {
            let pending = || {
                targets[i..]
                    .iter()
                    .map(|r| r.logical_name.clone())
                    .collect::<Vec<_>>()
            };

            if self.cancel.is_cancelled() {
                tracing::warn!("Cancellation requested, stopping teardown");
                return Err(PartialCompletionError {
                    completed: report.deleted,
                    pending: pending(),
                    failed: None,
                    source: None,
                }
                .into());
            }

            if let Err(err) = worker.teardown(record).await {
                tracing::error!(name = %record.logical_name, error = %err, "Delete failed");
                return Err(partial_or_root(
                    report.deleted,
                    pending(),
                    record.logical_name.clone(),
                    err,
                ));
            }
            report.deleted.push(record.logical_name.clone());
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            deleted = report.deleted.len(),
            duration_ms = report.duration_ms,
            "Destroy complete"
        );
        Ok(report)
    }

    /// Drops records of failed or interrupted deletions whose resource is gone.
    ///
    /// Returns the names removed from the ledger.
    pub async fn prune(&self) -> StackResult<Vec<String>> {
        let mut gone = Vec::new();
        for record in self.ledger.list().await {
            if record.status == RecordStatus::Ready {
                continue;
            }
            let description = self
                .worker()
                .describe(&record.logical_name, record.kind, &record.external_id)
                .await?;
            if description.status == LiveStatus::Missing {
                gone.push(record.logical_name);
            }
        }
        let dropped = self.ledger.compact(&gone).await?;
        if !dropped.is_empty() {
            tracing::info!(count = dropped.len(), "Pruned confirmed deletions");
        }
        Ok(dropped)
    }
}

fn partial_or_root(
    completed: Vec<String>,
    pending: Vec<String>,
    failed: String,
    err: StackError,
) -> StackError {
    if completed.is_empty() {
        return err;
    }
    PartialCompletionError {
        completed,
        pending,
        failed: Some(failed),
        source: Some(Box::new(err)),
    }
    .into()
}

fn is_cancellation(err: &StackError) -> bool {
    matches!(
        err,
        StackError::Provision(ProvisionError {
            failure: ProvisionFailure::Cancelled,
            ..
        })
    )
}

/// Why a record cannot be reused for the desired fingerprint
fn drift_reason(record: &ProvisioningRecord, desired: &str) -> Option<String> {
    if record.status != RecordStatus::Ready {
        Some(format!("record is in '{}' state", record.status))
    } else if record.fingerprint != desired {
        Some("declared parameters changed since the resource was created".to_string())
    } else {
        None
    }
}

/// Providers report some numbers as strings (`"80"`), declarations use either
fn comparable(value: &Value) -> Value {
    match value {
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        _ => value.clone(),
    }
}

enum Outcome {
    Created(ResolvedOutput),
    Reused(ResolvedOutput),
    Replaced(ResolvedOutput),
}

/// Everything one spawned task needs to realize a node
#[derive(Clone)]
struct Worker {
    provider: Arc<dyn CloudProvider>,
    ledger: Arc<Ledger>,
    retry: RetryConfig,
    policy: ReplacePolicy,
    refresh: bool,
    cancel: CancellationToken,
}

impl Worker {
    fn provision_error(
        name: &str,
        kind: ResourceKind,
        operation: Operation,
        err: RetryError,
    ) -> ProvisionError {
        let attempts = err.attempts();
        let failure = match err {
            RetryError::Failed { error, .. } => ProvisionFailure::Api(error),
            RetryError::Cancelled { .. } => ProvisionFailure::Cancelled,
        };
        ProvisionError {
            name: name.to_string(),
            kind,
            operation,
            attempts,
            failure,
        }
    }

    async fn realize(self, node: ResourceNode, params: Params) -> StackResult<Outcome> {
        let _guard = self.ledger.lock_name(&node.name).await;
        let fp = fingerprint(node.kind, &params);

        let Some(record) = self.ledger.get(&node.name).await else {
            let output = self.create(&node, params, fp).await?;
            return Ok(Outcome::Created(output));
        };

        let mut reason = drift_reason(&record, &fp);
        if reason.is_none() && self.refresh {
            reason = self.live_drift(&node, &record, &params).await?;
        }

        let Some(reason) = reason else {
            tracing::debug!(name = %node.name, id = %record.external_id, "Reusing recorded resource");
            return Ok(Outcome::Reused(record.output()));
        };

        if self.policy == ReplacePolicy::Fail {
            return Err(DriftError {
                name: node.name.clone(),
                kind: node.kind,
                reason,
                recorded_fingerprint: record.fingerprint.clone(),
                desired_fingerprint: Some(fp),
            }
            .into());
        }

        tracing::info!(name = %node.name, reason = %reason, "Replacing drifted resource");
        self.teardown(&record).await?;
        let output = self.create(&node, params, fp).await?;
        Ok(Outcome::Replaced(output))
    }

    /// Compares the provider's view of a reused resource with the desired
    /// parameters
    async fn live_drift(
        &self,
        node: &ResourceNode,
        record: &ProvisioningRecord,
        desired: &Params,
    ) -> StackResult<Option<String>> {
        let description = self
            .describe(&node.name, node.kind, &record.external_id)
            .await?;
        if description.status == LiveStatus::Missing {
            return Ok(Some(format!(
                "resource {} no longer exists",
                record.external_id
            )));
        }
        let Some(live) = description.params else {
            return Ok(None);
        };

        // Only keys both sides know about are compared
        let shared: Vec<&String> = live.keys().filter(|k| desired.contains_key(*k)).collect();
        let view = |params: &Params| -> Params {
            shared
                .iter()
                .filter_map(|k| params.get(*k).map(|v| ((*k).clone(), comparable(v))))
                .collect()
        };
        if fingerprint(node.kind, &view(&live)) != fingerprint(node.kind, &view(desired)) {
            return Ok(Some("live parameters were changed outside of stackflow".to_string()));
        }
        Ok(None)
    }

    async fn describe(
        &self,
        name: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> StackResult<ResourceDescription> {
        let label = format!("describe {}", name);
        match with_retry(&self.retry, &self.cancel, &label, || {
            self.provider.describe(kind, external_id)
        })
        .await
        {
            Ok((description, _)) => Ok(description),
            Err(RetryError::Failed { error, .. }) if error.is_not_found() => {
                Ok(ResourceDescription::missing())
            }
            Err(err) => Err(Self::provision_error(name, kind, Operation::Describe, err).into()),
        }
    }

    async fn create(
        &self,
        node: &ResourceNode,
        params: Params,
        fp: String,
    ) -> StackResult<ResolvedOutput> {
        let request = CreateRequest {
            logical_name: node.name.clone(),
            kind: node.kind,
            params,
        };
        let label = format!("create {}", node.name);
        let (created, attempts) = with_retry(&self.retry, &self.cancel, &label, || {
            self.provider.create(&request)
        })
        .await
        .map_err(|e| Self::provision_error(&node.name, node.kind, Operation::Create, e))?;

        let record = ProvisioningRecord::new(&node.name, node.kind, &created.external_id, fp)
            .with_dependencies(node.dependencies())
            .with_attributes(created.attributes);
        let record = self.ledger.insert(record).await?;

        tracing::info!(
            name = %node.name,
            kind = %node.kind,
            id = %record.external_id,
            attempts,
            "Created resource"
        );
        Ok(record.output())
    }

    /// Deletes one recorded resource, refusing while dependents are recorded
    async fn teardown(&self, record: &ProvisioningRecord) -> StackResult<()> {
        let name = &record.logical_name;
        let kind = record.kind;

        let dependents = self.ledger.dependents_of(name).await;
        if !dependents.is_empty() {
            return Err(ProvisionError {
                name: name.clone(),
                kind,
                operation: Operation::Delete,
                attempts: 0,
                failure: ProvisionFailure::DependentsRemain(dependents),
            }
            .into());
        }

        self.ledger.set_status(name, RecordStatus::Deleting).await?;

        let label = format!("delete {}", name);
        let result = with_retry(&self.retry, &self.cancel, &label, || {
            self.provider.delete(kind, &record.external_id)
        })
        .await;

        match result {
            Ok(_) => {}
            Err(RetryError::Failed { error, .. }) if error.is_not_found() => {
                tracing::debug!(name = %name, "Resource already gone");
            }
            Err(err) => {
                self.ledger.set_status(name, RecordStatus::Error).await?;
                return Err(Self::provision_error(name, kind, Operation::Delete, err).into());
            }
        }

        self.ledger.remove(name).await?;
        tracing::info!(name = %name, kind = %kind, id = %record.external_id, "Deleted resource");
        Ok(())
    }
}
