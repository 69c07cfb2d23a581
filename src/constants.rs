// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the AKO operator.
//!
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// Kind name for `AKODeploymentConfig`
pub const KIND_AKO_DEPLOYMENT_CONFIG: &str = "AKODeploymentConfig";

/// Kind name for Cluster API `Cluster`
pub const KIND_CLUSTER: &str = "Cluster";

/// Kind name for Cluster API `Machine`
pub const KIND_MACHINE: &str = "Machine";

// ============================================================================
// Reserved Configuration Names
// ============================================================================

/// The default `AKODeploymentConfig`; its selector is empty
pub const DEFAULT_ADC_NAME: &str = "install-ako-for-all";

// ============================================================================
// Namespaces
// ============================================================================

/// Namespace holding the management cluster; its clusters never get a finalizer
pub const TKG_SYSTEM_NAMESPACE: &str = "tkg-system";

/// Namespace AKO runs in on the workload cluster
pub const AVI_NAMESPACE: &str = "avi-system";

/// Default namespace of this operator (management-context credential secrets)
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "tkg-system-networking";

// ============================================================================
// HA Endpoint Constants
// ============================================================================

/// Suffix of the HA service name `<namespace>-<cluster>-control-plane`
pub const HA_SERVICE_NAME_SUFFIX: &str = "control-plane";

/// Port the kube-apiserver listens on inside control-plane machines
pub const API_SERVER_PORT: i32 = 6443;

/// Default port exposed by the HA service
pub const DEFAULT_CONTROL_PLANE_ENDPOINT_PORT: i32 = 6443;

// ============================================================================
// Addon Constants
// ============================================================================

/// Addon name recognized by the addon delivery agent
pub const AKO_ADDON_NAME: &str = "load-balancer-and-ingress-service";

/// Data key of the addon secret
pub const ADDON_VALUES_KEY: &str = "values.yaml";

/// Secret type recognized by the addon delivery agent
pub const ADDON_SECRET_TYPE: &str = "tkg.tanzu.vmware.com/addon";

/// Name of the AKO `StatefulSet` on the workload cluster
pub const AKO_STATEFULSET_NAME: &str = "ako";

/// Condition AKO sets on its `StatefulSet` while deleting Avi objects
pub const AKO_OBJECT_DELETION_CONDITION: &str = "ako.vmware.com/ObjectDeletionInProgress";

/// Default Avi controller version
pub const DEFAULT_CONTROLLER_VERSION: &str = "20.1.3";

// ============================================================================
// Credential Constants
// ============================================================================

/// Secret data key holding the Avi username
pub const CREDENTIAL_USERNAME_KEY: &str = "username";

/// Secret data key holding the Avi password
pub const CREDENTIAL_PASSWORD_KEY: &str = "password";

/// Secret data key holding the Avi controller CA
pub const CREDENTIAL_CA_KEY: &str = "certificateAuthorityData";

/// Avi role bound to every generated AKO user
pub const AKO_ROLE_NAME: &str = "ako-essential-role";

/// Length of generated Avi user passwords
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

/// Suffix of the Cluster API `<cluster>-kubeconfig` secret
pub const KUBECONFIG_SECRET_SUFFIX: &str = "kubeconfig";

/// Key of the kubeconfig inside the Cluster API `<cluster>-kubeconfig` secret
pub const KUBECONFIG_SECRET_KEY: &str = "value";

// ============================================================================
// Reconciliation Timing
// ============================================================================

/// Requeue interval when a resource is ready (5 minutes)
pub const REQUEUE_WHEN_READY_SECS: u64 = 300;

/// Requeue interval when a resource is not ready (30 seconds)
pub const REQUEUE_WHEN_NOT_READY_SECS: u64 = 30;

/// Requeue interval while waiting for AKO to finish deleting Avi objects
pub const ADDON_CLEANUP_REQUEUE_SECS: u64 = 30;

/// Write-back attempts per cluster before a conflict is surfaced
pub const MAX_CONFLICT_RETRIES: usize = 3;

/// Timeout for a single Avi controller request
pub const AVI_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the AKO cleanup check against a workload cluster
pub const WORKLOAD_CLUSTER_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default bind address of the metrics/health HTTP server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
