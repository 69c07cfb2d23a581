// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `AKODeploymentConfig` reconciliation logic.
//!
//! A configuration owns the clusters the selection resolver assigns to it. Each
//! invocation:
//! 1. Adds the configuration finalizer (or, when deleting, tears down and drops it)
//! 2. Rejects invalid specs with a `ConfigurationInvalid` condition
//! 3. Runs the apply phase list against owned clusters
//! 4. Runs the delete phase list against clusters this configuration labelled
//!    but no longer owns, so another configuration can claim them
//! 5. Reports the outcome as `Ready` / `ClustersReconciled` conditions

use crate::constants::KIND_AKO_DEPLOYMENT_CONFIG;
use crate::context::Context;
use crate::crd::{AKODeploymentConfig, Cluster};
use crate::errors::ReconcileError;
use crate::labels::{AKO_DEPLOYMENT_CONFIG_FINALIZER, AVI_CLUSTER_LABEL};
use crate::metrics::record_managed_clusters;
use crate::reconcilers::finalizers::{
    contains_finalizer, ensure_cluster_finalizer, remove_cluster_finalizer,
};
use crate::reconcilers::phases::{run_cluster_phases, KubeClusterStore, PhaseRunSummary};
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::status::{
    condition_changed, find_condition, AKODeploymentConfigStatusUpdater,
};
use crate::selector::resolve_owner;
use crate::status_reasons::{
    CONDITION_TYPE_CLUSTERS_RECONCILED, CONDITION_TYPE_READY, REASON_ALL_CLUSTERS_RECONCILED,
    REASON_CONFIGURATION_INVALID, REASON_NO_CLUSTERS, REASON_PARTIAL_FAILURE, REASON_PROGRESSING,
    REASON_RELEASING_CLUSTERS,
};
use crate::validation::{summarize, validate_spec};
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Clusters one configuration acts on during an invocation.
#[derive(Default)]
pub struct ClusterPartition {
    /// Run through the apply list (or the delete list when deleting)
    pub owned: Vec<Cluster>,
    /// Labelled by this configuration but now owned by another or by nobody
    pub stale: Vec<Cluster>,
}

fn labelled_by(cluster: &Cluster, config_name: &str) -> bool {
    cluster.labels().get(AVI_CLUSTER_LABEL).map(String::as_str) == Some(config_name)
}

/// Splits `clusters` into those `config` owns and those it must release.
///
/// A configuration being deleted only touches clusters it labelled; the
/// resolver never picks a deleting configuration.
#[must_use]
pub fn partition_clusters(
    config: &AKODeploymentConfig,
    clusters: Vec<Cluster>,
    configs: &[AKODeploymentConfig],
) -> ClusterPartition {
    let name = config.name_any();
    let mut partition = ClusterPartition::default();

    if config.metadata.deletion_timestamp.is_some() {
        partition.owned = clusters
            .into_iter()
            .filter(|c| labelled_by(c, &name))
            .collect();
        return partition;
    }

    for cluster in clusters {
        if resolve_owner(cluster.labels(), configs).as_deref() == Some(name.as_str()) {
            partition.owned.push(cluster);
        } else if labelled_by(&cluster, &name) {
            partition.stale.push(cluster);
        }
    }
    partition
}

/// `ClustersReconciled` condition (status, reason, message) for a run.
///
/// `releasing` counts clusters run through the delete list.
#[must_use]
pub fn clusters_condition(
    owned: usize,
    releasing: usize,
    result: &Result<PhaseRunSummary, ReconcileError>,
) -> (&'static str, &'static str, String) {
    match result {
        Err(e) => ("False", REASON_PARTIAL_FAILURE, e.to_string()),
        Ok(summary) if summary.requeue_after.is_some() && releasing > 0 => (
            "False",
            REASON_RELEASING_CLUSTERS,
            format!("Waiting for {releasing} released cluster(s) to finish cleanup"),
        ),
        Ok(summary) if summary.requeue_after.is_some() => (
            "False",
            REASON_PROGRESSING,
            "Waiting for cluster cleanup to finish".to_string(),
        ),
        Ok(_) if owned == 0 && releasing == 0 => (
            "True",
            REASON_NO_CLUSTERS,
            "No clusters are selected by this configuration".to_string(),
        ),
        Ok(_) => (
            "True",
            REASON_ALL_CLUSTERS_RECONCILED,
            format!("{owned} cluster(s) reconciled"),
        ),
    }
}

fn merge_runs(
    a: Result<PhaseRunSummary, ReconcileError>,
    b: Result<PhaseRunSummary, ReconcileError>,
) -> Result<PhaseRunSummary, ReconcileError> {
    match (a, b) {
        (Ok(x), Ok(y)) => Ok(PhaseRunSummary {
            requeue_after: match (x.requeue_after, y.requeue_after) {
                (Some(p), Some(q)) => Some(p.min(q)),
                (p, q) => p.or(q),
            },
            processed: x.processed + y.processed,
        }),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(e1), Err(e2)) => {
            let mut errors = Vec::new();
            for e in [e1, e2] {
                match e {
                    ReconcileError::Aggregate(inner) => errors.extend(inner),
                    other => errors.push(other),
                }
            }
            Err(ReconcileError::Aggregate(errors))
        }
    }
}

/// Reconciles an `AKODeploymentConfig`.
///
/// Returns the requeue a phase asked for, if any.
///
/// # Errors
///
/// Returns a `Validation` error for an invalid spec, a Kubernetes error when
/// listing or patching fails, or the (possibly aggregated) cluster failures.
/// Failures are also written to the status.
pub async fn reconcile_akodeploymentconfig(
    ctx: Arc<Context>,
    config: AKODeploymentConfig,
) -> Result<Option<Duration>, ReconcileError> {
    let name = config.name_any();
    let deleting = config.metadata.deletion_timestamp.is_some();
    info!(config = %name, deleting, "Reconciling AKODeploymentConfig");

    if deleting {
        if !contains_finalizer(&config.metadata, AKO_DEPLOYMENT_CONFIG_FINALIZER) {
            debug!(config = %name, "Finalizer already removed, nothing to do");
            return Ok(None);
        }
    } else {
        ensure_cluster_finalizer(&ctx.client, &config, AKO_DEPLOYMENT_CONFIG_FINALIZER).await?;
    }

    let previous_ready = config
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, CONDITION_TYPE_READY))
        .cloned();
    let mut status = AKODeploymentConfigStatusUpdater::new(&config);
    status.set_observed_generation(config.metadata.generation);

    if !deleting {
        let errors = validate_spec(&config, None);
        if !errors.is_empty() {
            let reason = summarize(&errors);
            warn!(config = %name, reason = %reason, "AKODeploymentConfig is invalid");
            status.set_condition(
                CONDITION_TYPE_READY,
                "False",
                REASON_CONFIGURATION_INVALID,
                &reason,
            );
            status.apply(&ctx.client).await?;
            return Err(ReconcileError::Validation {
                kind: KIND_AKO_DEPLOYMENT_CONFIG.to_string(),
                name,
                reason,
            });
        }
    }

    let list_params = ListParams::default();
    let config_api: Api<AKODeploymentConfig> = Api::all(ctx.client.clone());
    let configs = retry_api_call(
        || config_api.list(&list_params),
        KIND_AKO_DEPLOYMENT_CONFIG,
        "*",
    )
    .await?
    .items;

    let cluster_api: Api<Cluster> = Api::all(ctx.client.clone());
    let clusters = retry_api_call(|| cluster_api.list(&list_params), "Cluster", "*")
        .await?
        .items;

    let partition = partition_clusters(&config, clusters, &configs);
    let (owned, stale) = (partition.owned.len(), partition.stale.len());
    debug!(config = %name, owned, stale, "Partitioned clusters");
    record_managed_clusters(&name, if deleting { 0 } else { owned });

    let store = KubeClusterStore::new(ctx.client.clone());
    let lifecycle = &ctx.lifecycle;
    let owned_run = run_cluster_phases(
        &store,
        &config,
        partition.owned,
        &lifecycle.apply,
        &lifecycle.delete,
    )
    .await;
    let stale_run = if stale == 0 {
        Ok(PhaseRunSummary::default())
    } else {
        info!(config = %name, clusters = stale, "Releasing clusters no longer selected");
        run_cluster_phases(
            &store,
            &config,
            partition.stale,
            &lifecycle.delete,
            &lifecycle.delete,
        )
        .await
    };
    let result = merge_runs(owned_run, stale_run);

    let releasing = if deleting { owned + stale } else { stale };
    let (cond_status, reason, message) = clusters_condition(owned, releasing, &result);
    status.set_condition(CONDITION_TYPE_CLUSTERS_RECONCILED, cond_status, reason, &message);
    match &result {
        Ok(_) => status.set_condition(CONDITION_TYPE_READY, cond_status, reason, &message),
        Err(e) => status.set_condition(
            CONDITION_TYPE_READY,
            "False",
            e.status_reason(),
            &e.to_string(),
        ),
    }
    if let Some(ready) = find_condition(status.conditions(), CONDITION_TYPE_READY) {
        if condition_changed(&previous_ready, ready) {
            info!(
                config = %name,
                status = %ready.status,
                reason = ready.reason.as_deref().unwrap_or_default(),
                "Ready condition changed"
            );
        }
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(status_err) = status.apply(&ctx.client).await {
                warn!(config = %name, error = %status_err, "Failed to record failure in status");
            }
            return Err(e);
        }
    };

    if deleting && summary.requeue_after.is_none() {
        info!(config = %name, "All clusters released, removing finalizer");
        remove_cluster_finalizer(&ctx.client, &config, AKO_DEPLOYMENT_CONFIG_FINALIZER).await?;
        return Ok(None);
    }

    status.apply(&ctx.client).await?;
    Ok(summary.requeue_after)
}

#[cfg(test)]
#[path = "akodeploymentconfig_tests.rs"]
mod akodeploymentconfig_tests;
