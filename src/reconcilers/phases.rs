// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Phase engine for the clusters owned by an `AKODeploymentConfig`.
//!
//! A reconcile of a configuration runs a fixed, ordered list of [`ClusterPhase`]s
//! against every cluster it owns. Phases mutate an in-memory copy of the
//! `Cluster`; the engine then writes the difference back through a
//! [`ClusterStore`] with the original `resourceVersion` as a precondition.
//!
//! # Rules
//!
//! - The delete list runs when the configuration or the cluster is being
//!   deleted, the apply list otherwise.
//! - Phases run strictly in order. An error aborts the rest of the list for that
//!   cluster only; sibling clusters are still processed.
//! - [`PhaseOutcome::Requeue`] stops the list without failing. Mutations made so
//!   far are persisted.
//! - A write-back conflict re-fetches the cluster and re-runs the whole list, up
//!   to [`MAX_CONFLICT_RETRIES`] attempts. Phases must therefore be idempotent.
//! - Failures carry the cluster identity and are aggregated.

use crate::constants::{KIND_CLUSTER, MAX_CONFLICT_RETRIES};
use crate::crd::{AKODeploymentConfig, Cluster};
use crate::errors::ReconcileError;
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the engine does after a phase returns successfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Run the next phase
    Continue,
    /// Stop this cluster's list and reconcile again after the delay
    Requeue(Duration),
}

/// One idempotent step applied to a cluster owned by a configuration.
#[async_trait]
pub trait ClusterPhase: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Applies the phase. In-memory mutations of `cluster` are persisted by the
    /// engine; side effects on other objects are the phase's own business.
    async fn run(
        &self,
        cluster: &mut Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError>;
}

/// Read/write access to `Cluster` objects with optimistic concurrency.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fresh read. `None` when the cluster no longer exists.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ReconcileError>;

    /// Persists what changed between `original` and `updated`.
    ///
    /// Fails with [`ReconcileError::Conflict`] if the stored object moved past
    /// `original`'s `resourceVersion`.
    async fn write_back(&self, original: &Cluster, updated: &Cluster)
        -> Result<(), ReconcileError>;
}

/// [`ClusterStore`] backed by the Kubernetes API.
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ReconcileError> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| ReconcileError::from_kube(e, KIND_CLUSTER, &format!("{namespace}/{name}")))
    }

    async fn write_back(
        &self,
        original: &Cluster,
        updated: &Cluster,
    ) -> Result<(), ReconcileError> {
        let namespace = original.namespace().unwrap_or_default();
        let name = original.name_any();

        let Some(patch) = cluster_write_patch(original, updated) else {
            debug!(cluster = %format!("{namespace}/{name}"), "Cluster unchanged, skipping write");
            return Ok(());
        };

        let api: Api<Cluster> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                ReconcileError::from_kube(e, KIND_CLUSTER, &format!("{namespace}/{name}"))
            })?;
        Ok(())
    }
}

fn map_diff(
    before: Option<&BTreeMap<String, String>>,
    after: Option<&BTreeMap<String, String>>,
) -> Option<Value> {
    let empty = BTreeMap::new();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    let mut diff = Map::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            diff.insert(key.clone(), json!(value));
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            diff.insert(key.clone(), Value::Null);
        }
    }

    (!diff.is_empty()).then_some(Value::Object(diff))
}

/// JSON merge patch carrying only what changed between two versions of a cluster.
///
/// Covers labels, annotations, finalizers and `spec.controlPlaneEndpoint`.
/// Removed map keys become `null`. The endpoint is never cleared. The original
/// `resourceVersion` is included as a precondition. Returns `None` when nothing
/// changed.
#[must_use]
pub fn cluster_write_patch(original: &Cluster, updated: &Cluster) -> Option<Value> {
    let mut metadata = Map::new();

    if let Some(labels) = map_diff(
        original.metadata.labels.as_ref(),
        updated.metadata.labels.as_ref(),
    ) {
        metadata.insert("labels".to_string(), labels);
    }
    if let Some(annotations) = map_diff(
        original.metadata.annotations.as_ref(),
        updated.metadata.annotations.as_ref(),
    ) {
        metadata.insert("annotations".to_string(), annotations);
    }
    if original.finalizers() != updated.finalizers() {
        metadata.insert("finalizers".to_string(), json!(updated.finalizers()));
    }

    let mut patch = Map::new();
    if let Some(endpoint) = updated
        .spec
        .control_plane_endpoint
        .as_ref()
        .filter(|e| original.spec.control_plane_endpoint.as_ref() != Some(*e))
    {
        patch.insert(
            "spec".to_string(),
            json!({ "controlPlaneEndpoint": endpoint }),
        );
    }

    if metadata.is_empty() && patch.is_empty() {
        return None;
    }

    if let Some(rv) = &original.metadata.resource_version {
        metadata.insert("resourceVersion".to_string(), json!(rv));
    }
    patch.insert("metadata".to_string(), Value::Object(metadata));
    Some(Value::Object(patch))
}

/// Outcome of a successful engine run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseRunSummary {
    /// Shortest requeue any phase asked for
    pub requeue_after: Option<Duration>,
    /// Clusters whose phase list completed or requeued
    pub processed: usize,
}

fn shortest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

async fn run_phase_list(
    phases: &[Box<dyn ClusterPhase>],
    cluster: &mut Cluster,
    config: &AKODeploymentConfig,
) -> Result<Option<Duration>, ReconcileError> {
    for phase in phases {
        debug!(phase = phase.name(), cluster = %cluster.name_any(), "Running phase");
        match phase.run(cluster, config).await? {
            PhaseOutcome::Continue => {}
            PhaseOutcome::Requeue(after) => {
                debug!(
                    phase = phase.name(),
                    cluster = %cluster.name_any(),
                    requeue_after = ?after,
                    "Phase requested requeue"
                );
                return Ok(Some(after));
            }
        }
    }
    Ok(None)
}

async fn reconcile_cluster(
    store: &dyn ClusterStore,
    config: &AKODeploymentConfig,
    cluster: Cluster,
    apply: &[Box<dyn ClusterPhase>],
    delete: &[Box<dyn ClusterPhase>],
) -> Result<Option<Duration>, ReconcileError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let config_deleting = config.metadata.deletion_timestamp.is_some();

    let mut current = cluster;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let deleting = config_deleting || current.metadata.deletion_timestamp.is_some();
        let phases = if deleting { delete } else { apply };

        let mut working = current.clone();
        let outcome = run_phase_list(phases, &mut working, config).await;

        match (store.write_back(&current, &working).await, outcome) {
            (Ok(()), outcome) => return outcome,
            (Err(write_err), Err(phase_err)) => {
                warn!(
                    cluster = %format!("{namespace}/{name}"),
                    error = %write_err,
                    "Failed to persist partial cluster changes"
                );
                return Err(phase_err);
            }
            (Err(write_err), Ok(_))
                if write_err.is_conflict() && attempt < MAX_CONFLICT_RETRIES =>
            {
                debug!(
                    cluster = %format!("{namespace}/{name}"),
                    attempt,
                    "Cluster changed underneath, re-fetching"
                );
                match store.get(&namespace, &name).await? {
                    Some(fresh) => current = fresh,
                    None => {
                        debug!(cluster = %format!("{namespace}/{name}"), "Cluster is gone");
                        return Ok(None);
                    }
                }
            }
            (Err(write_err), Ok(_)) => return Err(write_err),
        }
    }
}

/// Runs the apply or delete phase list against every cluster.
///
/// # Errors
///
/// Returns the failure of a single cluster wrapped with its identity, or
/// [`ReconcileError::Aggregate`] when several clusters failed. Clusters that
/// succeeded have been persisted either way.
pub async fn run_cluster_phases(
    store: &dyn ClusterStore,
    config: &AKODeploymentConfig,
    clusters: Vec<Cluster>,
    apply: &[Box<dyn ClusterPhase>],
    delete: &[Box<dyn ClusterPhase>],
) -> Result<PhaseRunSummary, ReconcileError> {
    let mut summary = PhaseRunSummary::default();
    let mut errors = Vec::new();

    for cluster in clusters {
        let id = format!(
            "{}/{}",
            cluster.namespace().unwrap_or_default(),
            cluster.name_any()
        );
        match reconcile_cluster(store, config, cluster, apply, delete).await {
            Ok(requeue) => {
                summary.processed += 1;
                summary.requeue_after = shortest(summary.requeue_after, requeue);
            }
            Err(e) => {
                warn!(
                    config = %config.name_any(),
                    cluster = %id,
                    error = %e,
                    "Cluster phases failed"
                );
                errors.push(e.for_cluster(&id));
            }
        }
    }

    info!(
        config = %config.name_any(),
        processed = summary.processed,
        failed = errors.len(),
        "Finished cluster phases"
    );

    match errors.len() {
        0 => Ok(summary),
        1 => Err(errors.remove(0)),
        _ => Err(ReconcileError::Aggregate(errors)),
    }
}

#[cfg(test)]
#[path = "phases_tests.rs"]
mod phases_tests;
