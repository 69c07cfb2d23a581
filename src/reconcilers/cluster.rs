// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API `Cluster` reconciliation logic.
//!
//! Drives the control-plane HA service when Avi is the HA provider, and releases
//! clusters no configuration claims any more. Everything a configuration does to
//! its clusters happens in the configuration reconciler.

use crate::constants::{KIND_AKO_DEPLOYMENT_CONFIG, REQUEUE_WHEN_NOT_READY_SECS};
use crate::context::Context;
use crate::crd::{AKODeploymentConfig, Cluster, Machine};
use crate::errors::ReconcileError;
use crate::labels::{
    AVI_CLUSTER_LABEL, AVI_CLUSTER_SELECTED_LABEL, CLUSTER_FINALIZER, CLUSTER_NAME_LABEL,
    MACHINE_CONTROL_PLANE_LABEL,
};
use crate::reconcilers::finalizers::remove_finalizer_in_memory;
use crate::reconcilers::haprovider::HaServiceState;
use crate::reconcilers::phases::{ClusterStore, KubeClusterStore};
use crate::reconcilers::retry::retry_api_call;
use crate::selector::resolve_owner;
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Drops the finalizer and ownership labels of a cluster that no configuration
/// owns or is releasing. Returns true if anything changed.
///
/// A cluster whose ownership label names an existing configuration is left to
/// that configuration, even while it is being deleted.
pub fn release_orphan(cluster: &mut Cluster, configs: &[AKODeploymentConfig]) -> bool {
    if resolve_owner(cluster.labels(), configs).is_some() {
        return false;
    }
    let incumbent = cluster.labels().get(AVI_CLUSTER_LABEL).cloned();
    if incumbent.is_some_and(|name| configs.iter().any(|c| c.name_any() == name)) {
        return false;
    }

    let mut changed = remove_finalizer_in_memory(&mut cluster.metadata, CLUSTER_FINALIZER);
    let labels = cluster.labels_mut();
    changed |= labels.remove(AVI_CLUSTER_LABEL).is_some();
    changed |= labels.remove(AVI_CLUSTER_SELECTED_LABEL).is_some();
    changed
}

async fn control_plane_machines(
    ctx: &Context,
    namespace: &str,
    cluster_name: &str,
) -> Result<Vec<Machine>, ReconcileError> {
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), namespace);
    let params = ListParams::default().labels(&format!(
        "{CLUSTER_NAME_LABEL}={cluster_name},{MACHINE_CONTROL_PLANE_LABEL}"
    ));
    Ok(retry_api_call(
        || api.list(&params),
        "Machine",
        &format!("{namespace}/{cluster_name}"),
    )
    .await?
    .items)
}

/// Reconciles a Cluster API `Cluster`.
///
/// Returns a short requeue while the HA service waits for its VIP.
///
/// # Errors
///
/// Kubernetes failures, HA service failures, or a write conflict.
pub async fn reconcile_cluster(
    ctx: Arc<Context>,
    cluster: Cluster,
) -> Result<Option<Duration>, ReconcileError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    debug!(cluster = %format!("{namespace}/{name}"), "Reconciling Cluster");

    let list_params = ListParams::default();
    let config_api: Api<AKODeploymentConfig> = Api::all(ctx.client.clone());
    let configs = retry_api_call(
        || config_api.list(&list_params),
        KIND_AKO_DEPLOYMENT_CONFIG,
        "*",
    )
    .await?
    .items;

    let mut working = cluster.clone();
    let mut requeue = None;

    let ha = &ctx.ha_provider;
    if ha.enabled() && cluster.metadata.deletion_timestamp.is_none() {
        debug!(cluster = %name, "Avi is the control plane HA provider");
        let state = ha.reconcile_ha_service(&mut working, &configs).await?;
        if state == HaServiceState::ServiceCreated {
            requeue = Some(Duration::from_secs(REQUEUE_WHEN_NOT_READY_SECS));
        }
        if !ctx.settings.bootstrap_cluster {
            let machines = control_plane_machines(&ctx, &namespace, &name).await?;
            ha.sync_endpoint_members(&working, &machines).await?;
        }
    }

    if !ctx.settings.bootstrap_cluster && release_orphan(&mut working, &configs) {
        info!(
            cluster = %format!("{namespace}/{name}"),
            finalizer = CLUSTER_FINALIZER,
            "No AKODeploymentConfig selects this cluster, releasing it"
        );
    }

    KubeClusterStore::new(ctx.client.clone())
        .write_back(&cluster, &working)
        .await?;

    Ok(requeue)
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
