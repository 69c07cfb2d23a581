// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers with reflector stores.
//!
//! All controllers receive an `Arc<Context>` holding the Kubernetes client, the
//! operator settings, the collaborators the reconcilers delegate to, and the
//! reflector stores used by watch mappers. Reconcilers always read objects
//! fresh from the API; the stores are only consulted to fan events out.

use crate::crd::{AKODeploymentConfig, Cluster, Machine};
use crate::reconcilers::cluster_phases::ClusterLifecycle;
use crate::reconcilers::haprovider::{machine_cluster_name, HaProvider};
use crate::selector::find_configs_for_cluster;
use crate::settings::OperatorSettings;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, ResourceExt};
use std::sync::Arc;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    /// Process-wide settings
    pub settings: OperatorSettings,

    /// Reflector stores for watch mappers
    pub stores: Stores,

    /// Apply and delete phase lists
    pub lifecycle: Arc<ClusterLifecycle>,

    /// Control-plane HA service and endpoint management
    pub ha_provider: Arc<HaProvider>,
}

/// Reflector stores for cross-controller queries.
#[derive(Clone)]
pub struct Stores {
    pub ako_deployment_configs: Store<AKODeploymentConfig>,
}

impl Stores {
    /// Configurations to reconcile when `cluster` changes.
    #[must_use]
    pub fn configs_for_cluster(&self, cluster: &Cluster) -> Vec<ObjectRef<AKODeploymentConfig>> {
        find_configs_for_cluster(&self.ako_deployment_configs, cluster)
    }
}

/// Cluster to reconcile when one of its machines changes.
#[must_use]
pub fn cluster_for_machine(machine: &Machine) -> Option<ObjectRef<Cluster>> {
    let cluster_name = machine_cluster_name(machine)?;
    let namespace = machine.namespace()?;
    Some(ObjectRef::new(&cluster_name).within(&namespace))
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
