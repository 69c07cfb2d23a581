// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Well-known label, annotation, and finalizer keys.
//!
//! The literal values here are a cross-component contract: the admission gate,
//! the watch mappers, the phase engine, and consumers outside this operator all
//! read the same keys, so they must never change.

// ============================================================================
// Cluster Ownership Labels
// ============================================================================

/// Ownership label on a `Cluster`, holding the name of the owning `AKODeploymentConfig`
pub const AVI_CLUSTER_LABEL: &str = "networking.tkg.tanzu.vmware.com/avi";

/// Marker label meaning "claimed by a non-default `AKODeploymentConfig`".
///
/// While present, the default (empty-selector) configuration never claims the cluster.
pub const AVI_CLUSTER_SELECTED_LABEL: &str = "networking.tkg.tanzu.vmware.com/avi-skip-default-adc";

/// Label requesting that AKO delete its Avi objects when the addon is removed
pub const AVI_CLUSTER_DELETE_CONFIG_LABEL: &str = "networking.tkg.tanzu.vmware.com/avi-delete-config";

/// Label carried by the management cluster
pub const TKG_MANAGEMENT_CLUSTER_ROLE_LABEL: &str = "cluster-role.tkg.tanzu.vmware.com/management";

// ============================================================================
// Cluster API Labels
// ============================================================================

/// Present on every control-plane `Machine`
pub const MACHINE_CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Names the `Cluster` a `Machine` belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

// ============================================================================
// HA Service Annotations
// ============================================================================

/// Tells AKO to skip NodePort handling for the HA service
pub const HA_SERVICE_ANNOTATION: &str = "skipnodeport.ako.vmware.com/enabled";

/// Binds the HA service to an `AviInfraSetting`
pub const HA_AVI_INFRA_SETTING_ANNOTATION: &str = "aviinfrasetting.ako.vmware.com/name";

/// Cluster name carried on the HA service
pub const TKG_CLUSTER_NAME_ANNOTATION: &str = "tkg.tanzu.vmware.com/cluster-name";

/// Cluster namespace carried on the HA service
pub const TKG_CLUSTER_NAMESPACE_ANNOTATION: &str = "tkg.tanzu.vmware.com/cluster-namespace";

/// Fixed control-plane endpoint (IP or hostname) declared on a `Cluster`
pub const CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION: &str =
    "tkg.tanzu.vmware.com/cluster-controlplane-endpoint";

// ============================================================================
// Addon Secret Labels and Annotations
// ============================================================================

/// Addon name label read by the addon delivery agent
pub const TKG_ADDON_LABEL: &str = "tkg.tanzu.vmware.com/addon-name";

/// Cluster name label read by the addon delivery agent
pub const TKG_CLUSTER_NAME_LABEL: &str = "tkg.tanzu.vmware.com/cluster-name";

/// SHA-256 of the rendered addon values, used to skip no-op updates
pub const ADDON_VALUES_CHECKSUM_ANNOTATION: &str =
    "networking.tkg.tanzu.vmware.com/values-checksum";

// ============================================================================
// Finalizers
// ============================================================================

/// Deletion guard on a `Cluster`, lifted once addon cleanup has finished
pub const CLUSTER_FINALIZER: &str = "ako-operator.networking.tkg.tanzu.vmware.com";

/// Deletion guard on an `AKODeploymentConfig`, lifted once it owns no cluster
pub const AKO_DEPLOYMENT_CONFIG_FINALIZER: &str =
    "akodeploymentconfig.networking.tkg.tanzu.vmware.com";

/// Deletion guard on the management cluster's HA service
pub const HA_SERVICE_BOOTSTRAP_CLUSTER_FINALIZER: &str =
    "ako-operator.networking.tkg.tanzu.vmware.com/ha-service";
