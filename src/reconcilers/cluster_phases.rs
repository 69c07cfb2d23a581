// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The cluster phases run by the `AKODeploymentConfig` reconciler.
//!
//! | Phase | Effect |
//! |---|---|
//! | [`ApplyClusterLabel`] | ownership label := config name, marker iff not default |
//! | [`RemoveClusterLabel`] | clears ownership and marker when owned by this config |
//! | [`AddClusterFinalizer`] | adds the cluster finalizer outside `tkg-system` |
//! | [`RemoveClusterFinalizer`] | removes the cluster finalizer |
//! | [`ProvisionCredentials`] / [`RemoveCredentials`] | per-cluster Avi credentials |
//! | [`ReconcileAddonSecret`] / [`DeleteAddonSecret`] | the AKO addon secret |
//! | [`AwaitAddonCleanup`] | waits until AKO removed its Avi objects |
//!
//! Apply order: label, finalizer, credentials, addon secret. Delete order: addon
//! secret, wait for cleanup, credentials, label, finalizer. The ownership label
//! stays until cleanup finished so the cluster keeps being routed to its config.

use crate::addon::{
    addon_secret_name, build_addon_secret, recorded_checksum, values_checksum, AddonValues,
};
use crate::constants::{
    ADDON_CLEANUP_REQUEUE_SECS, AKO_OBJECT_DELETION_CONDITION, AKO_STATEFULSET_NAME, AVI_NAMESPACE,
    KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX, TKG_SYSTEM_NAMESPACE,
    WORKLOAD_CLUSTER_TIMEOUT_SECS,
};
use crate::crd::{AKODeploymentConfig, Cluster};
use crate::errors::ReconcileError;
use crate::labels::{AVI_CLUSTER_LABEL, AVI_CLUSTER_SELECTED_LABEL, CLUSTER_FINALIZER};
use crate::reconcilers::credentials::{cluster_secret_name, CredentialProvisioner};
use crate::reconcilers::finalizers::{add_finalizer_in_memory, remove_finalizer_in_memory};
use crate::reconcilers::phases::{ClusterPhase, PhaseOutcome};
use crate::reconcilers::resources::{secret_string, SecretStore};
use crate::selector::is_default_config;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// Labels and finalizers
// ============================================================================

/// Marks the cluster as owned by the configuration.
pub struct ApplyClusterLabel;

#[async_trait]
impl ClusterPhase for ApplyClusterLabel {
    fn name(&self) -> &'static str {
        "ApplyClusterLabel"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        let owner = config.name_any();
        let is_default = is_default_config(config);
        let labels = cluster.labels_mut();

        let mut changed = false;
        if labels.get(AVI_CLUSTER_LABEL) != Some(&owner) {
            labels.insert(AVI_CLUSTER_LABEL.to_string(), owner.clone());
            changed = true;
        }
        if is_default {
            changed |= labels.remove(AVI_CLUSTER_SELECTED_LABEL).is_some();
        } else if !labels.contains_key(AVI_CLUSTER_SELECTED_LABEL) {
            labels.insert(AVI_CLUSTER_SELECTED_LABEL.to_string(), String::new());
            changed = true;
        }

        if changed {
            info!(
                cluster = %cluster.name_any(),
                config = %owner,
                "Applied ownership label to cluster"
            );
        } else {
            debug!(
                cluster = %cluster.name_any(),
                config = %owner,
                "Ownership label already applied"
            );
        }
        Ok(PhaseOutcome::Continue)
    }
}

/// Releases the cluster, unless another configuration already owns it.
pub struct RemoveClusterLabel;

#[async_trait]
impl ClusterPhase for RemoveClusterLabel {
    fn name(&self) -> &'static str {
        "RemoveClusterLabel"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        let owner = config.name_any();
        let cluster_name = cluster.name_any();
        let labels = cluster.labels_mut();

        if labels.get(AVI_CLUSTER_LABEL).is_some_and(|v| *v != owner) {
            debug!(
                cluster = %cluster_name,
                config = %owner,
                "Cluster owned by another config, keeping labels"
            );
            return Ok(PhaseOutcome::Continue);
        }

        let removed = labels.remove(AVI_CLUSTER_LABEL).is_some();
        labels.remove(AVI_CLUSTER_SELECTED_LABEL);
        if removed {
            info!(cluster = %cluster_name, config = %owner, "Removed ownership label from cluster");
        }
        Ok(PhaseOutcome::Continue)
    }
}

/// Guards cluster deletion until AKO cleanup finished.
pub struct AddClusterFinalizer;

#[async_trait]
impl ClusterPhase for AddClusterFinalizer {
    fn name(&self) -> &'static str {
        "AddClusterFinalizer"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        _config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        if cluster.namespace().as_deref() == Some(TKG_SYSTEM_NAMESPACE) {
            return Ok(PhaseOutcome::Continue);
        }
        if add_finalizer_in_memory(&mut cluster.metadata, CLUSTER_FINALIZER) {
            info!(
                cluster = %cluster.name_any(),
                finalizer = CLUSTER_FINALIZER,
                "Added finalizer to cluster"
            );
        }
        Ok(PhaseOutcome::Continue)
    }
}

pub struct RemoveClusterFinalizer;

#[async_trait]
impl ClusterPhase for RemoveClusterFinalizer {
    fn name(&self) -> &'static str {
        "RemoveClusterFinalizer"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        _config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        if remove_finalizer_in_memory(&mut cluster.metadata, CLUSTER_FINALIZER) {
            info!(
                cluster = %cluster.name_any(),
                finalizer = CLUSTER_FINALIZER,
                "Removed finalizer from cluster"
            );
        }
        Ok(PhaseOutcome::Continue)
    }
}

// ============================================================================
// Credentials
// ============================================================================

pub struct ProvisionCredentials {
    pub credentials: Arc<CredentialProvisioner>,
}

#[async_trait]
impl ClusterPhase for ProvisionCredentials {
    fn name(&self) -> &'static str {
        "ProvisionCredentials"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        self.credentials.provision(cluster, config).await?;
        Ok(PhaseOutcome::Continue)
    }
}

pub struct RemoveCredentials {
    pub credentials: Arc<CredentialProvisioner>,
}

#[async_trait]
impl ClusterPhase for RemoveCredentials {
    fn name(&self) -> &'static str {
        "RemoveCredentials"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        _config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        self.credentials.remove(cluster).await?;
        Ok(PhaseOutcome::Continue)
    }
}

// ============================================================================
// Addon secret
// ============================================================================

/// Renders the AKO values for the cluster and writes the addon secret when the
/// values checksum changed.
pub struct ReconcileAddonSecret {
    pub secrets: Arc<dyn SecretStore>,
    pub credentials: Arc<CredentialProvisioner>,
}

#[async_trait]
impl ClusterPhase for ReconcileAddonSecret {
    fn name(&self) -> &'static str {
        "ReconcileAddonSecret"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        let credentials = self.credentials.current(cluster).await?.ok_or_else(|| {
            ReconcileError::pending(
                "Secret",
                &format!("{namespace}/{}", cluster_secret_name(&cluster_name)),
            )
        })?;

        let values_yaml = AddonValues::new(config, cluster, &credentials)?.to_values_yaml()?;
        let checksum = values_checksum(&values_yaml);
        let secret_name = addon_secret_name(&cluster_name);

        let existing = self.secrets.get(&namespace, &secret_name).await?;
        if existing.as_ref().and_then(recorded_checksum) == Some(checksum.as_str()) {
            debug!(secret = %format!("{namespace}/{secret_name}"), "Addon secret up to date");
            return Ok(PhaseOutcome::Continue);
        }

        info!(
            secret = %format!("{namespace}/{secret_name}"),
            config = %config.name_any(),
            "Writing addon secret"
        );
        self.secrets
            .apply(&build_addon_secret(cluster, &values_yaml))
            .await?;
        Ok(PhaseOutcome::Continue)
    }
}

pub struct DeleteAddonSecret {
    pub secrets: Arc<dyn SecretStore>,
}

#[async_trait]
impl ClusterPhase for DeleteAddonSecret {
    fn name(&self) -> &'static str {
        "DeleteAddonSecret"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        _config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let secret_name = addon_secret_name(&cluster.name_any());
        if self.secrets.delete(&namespace, &secret_name).await? {
            info!(secret = %format!("{namespace}/{secret_name}"), "Deleted addon secret");
        }
        Ok(PhaseOutcome::Continue)
    }
}

// ============================================================================
// AKO cleanup
// ============================================================================

/// Reports whether AKO finished removing its Avi objects from a workload cluster.
#[async_trait]
pub trait AddonCleanupProbe: Send + Sync {
    async fn cleanup_finished(&self, cluster: &Cluster) -> Result<bool, ReconcileError>;
}

/// True when the AKO `StatefulSet` reports its object deletion as done.
#[must_use]
pub fn deletion_finished(statefulset: &StatefulSet) -> bool {
    statefulset
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == AKO_OBJECT_DELETION_CONDITION && c.status == "False")
        })
}

/// Probe connecting to the workload cluster through its Cluster API kubeconfig
/// secret. A missing secret or a missing AKO `StatefulSet` counts as finished.
pub struct KubeconfigCleanupProbe {
    secrets: Arc<dyn SecretStore>,
}

impl KubeconfigCleanupProbe {
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    async fn workload_client(&self, raw: &str, target: &str) -> Result<Client, ReconcileError> {
        let transport = |reason: String| ReconcileError::Transport {
            target: target.to_string(),
            reason,
        };
        let kubeconfig = Kubeconfig::from_yaml(raw).map_err(|e| ReconcileError::Validation {
            kind: "Secret".to_string(),
            name: target.to_string(),
            reason: format!("invalid kubeconfig: {e}"),
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| transport(e.to_string()))?;
        Client::try_from(config).map_err(|e| transport(e.to_string()))
    }
}

#[async_trait]
impl AddonCleanupProbe for KubeconfigCleanupProbe {
    async fn cleanup_finished(&self, cluster: &Cluster) -> Result<bool, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let secret_name = format!("{}-{KUBECONFIG_SECRET_SUFFIX}", cluster.name_any());
        let target = format!("{namespace}/{secret_name}");

        let Some(secret) = self.secrets.get(&namespace, &secret_name).await? else {
            info!(secret = %target, "Kubeconfig secret is gone, treating AKO cleanup as finished");
            return Ok(true);
        };
        let raw = secret_string(&secret, KUBECONFIG_SECRET_KEY).ok_or_else(|| {
            ReconcileError::Validation {
                kind: "Secret".to_string(),
                name: target.clone(),
                reason: format!("missing key '{KUBECONFIG_SECRET_KEY}'"),
            }
        })?;

        let client = self.workload_client(&raw, &target).await?;
        let api: Api<StatefulSet> = Api::namespaced(client, AVI_NAMESPACE);
        let statefulset = tokio::time::timeout(
            Duration::from_secs(WORKLOAD_CLUSTER_TIMEOUT_SECS),
            api.get_opt(AKO_STATEFULSET_NAME),
        )
        .await?
        .map_err(|e| ReconcileError::Transport {
            target: format!("workload cluster {namespace}/{}", cluster.name_any()),
            reason: e.to_string(),
        })?;

        match statefulset {
            None => {
                info!(cluster = %cluster.name_any(), "AKO StatefulSet is gone, cleanup finished");
                Ok(true)
            }
            Some(ss) => Ok(deletion_finished(&ss)),
        }
    }
}

/// Requeues until the probe reports AKO cleanup as finished.
pub struct AwaitAddonCleanup {
    pub probe: Arc<dyn AddonCleanupProbe>,
}

#[async_trait]
impl ClusterPhase for AwaitAddonCleanup {
    fn name(&self) -> &'static str {
        "AwaitAddonCleanup"
    }

    async fn run(
        &self,
        cluster: &mut Cluster,
        _config: &AKODeploymentConfig,
    ) -> Result<PhaseOutcome, ReconcileError> {
        if self.probe.cleanup_finished(cluster).await? {
            return Ok(PhaseOutcome::Continue);
        }
        info!(cluster = %cluster.name_any(), "Waiting for AKO to finish deleting Avi objects");
        Ok(PhaseOutcome::Requeue(Duration::from_secs(
            ADDON_CLEANUP_REQUEUE_SECS,
        )))
    }
}

// ============================================================================
// Phase lists
// ============================================================================

/// The two ordered phase lists run against owned clusters.
pub struct ClusterLifecycle {
    pub apply: Vec<Box<dyn ClusterPhase>>,
    pub delete: Vec<Box<dyn ClusterPhase>>,
}

impl ClusterLifecycle {
    #[must_use]
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        credentials: Arc<CredentialProvisioner>,
        probe: Arc<dyn AddonCleanupProbe>,
    ) -> Self {
        Self {
            apply: vec![
                Box::new(ApplyClusterLabel),
                Box::new(AddClusterFinalizer),
                Box::new(ProvisionCredentials {
                    credentials: credentials.clone(),
                }),
                Box::new(ReconcileAddonSecret {
                    secrets: secrets.clone(),
                    credentials: credentials.clone(),
                }),
            ],
            delete: vec![
                Box::new(DeleteAddonSecret { secrets }),
                Box::new(AwaitAddonCleanup { probe }),
                Box::new(RemoveCredentials { credentials }),
                Box::new(RemoveClusterLabel),
                Box::new(RemoveClusterFinalizer),
            ],
        }
    }
}

#[cfg(test)]
#[path = "cluster_phases_tests.rs"]
mod cluster_phases_tests;
