// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions and external resource types.
//!
//! # Resource Types
//!
//! ## Owned by this operator
//!
//! - [`AKODeploymentConfig`] - Desired Avi/AKO settings for a set of clusters,
//!   selected by label.
//!
//! ## Owned by Cluster API (read, labelled, and patched)
//!
//! - [`Cluster`] - A workload or management cluster
//! - [`Machine`] - A cluster node; control-plane machines feed the HA endpoint
//!
//! ## Owned by AKO (existence check only)
//!
//! - [`AviInfraSetting`] - Placement binding referenced by the HA service
//!
//! # Example: Creating an `AKODeploymentConfig`
//!
//! ```rust,no_run
//! use ako_operator::crd::{AKODeploymentConfigSpec, DataNetwork, IpPool, LabelSelector, SecretRef};
//! use std::collections::BTreeMap;
//!
//! let spec = AKODeploymentConfigSpec {
//!     cloud_name: "Default-Cloud".to_string(),
//!     controller: "10.0.0.2".to_string(),
//!     service_engine_group: "Default-Group".to_string(),
//!     cluster_selector: Some(LabelSelector {
//!         match_labels: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
//!         match_expressions: None,
//!     }),
//!     admin_credential_ref: SecretRef::new("avi-controller-credentials", "tkg-system-networking"),
//!     certificate_authority_ref: SecretRef::new("avi-controller-ca", "tkg-system-networking"),
//!     data_network: DataNetwork {
//!         name: "VM Network".to_string(),
//!         cidr: "10.0.0.0/24".to_string(),
//!         ip_pools: vec![IpPool::v4("10.0.0.1", "10.0.0.10")],
//!     },
//!     ..Default::default()
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label selector to match Kubernetes resources.
///
/// A label selector is a label query over a set of resources. The result of matchLabels and
/// matchExpressions are `ANDed`. An empty label selector matches all objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of {key,value} pairs. A single {key,value} in the matchLabels map is equivalent
    /// to an element of matchExpressions, whose key field is "key", the operator is "In",
    /// and the values array contains only "value". All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// List of label selector requirements. All requirements must be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

impl LabelSelector {
    /// True when neither labels nor expressions constrain the match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().is_none_or(BTreeMap::is_empty)
            && self.match_expressions.as_ref().is_none_or(Vec::is_empty)
    }

    /// Evaluates the selector against a label set using Kubernetes semantics.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self.match_labels.as_ref().is_none_or(|wanted| {
            wanted
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
        });

        labels_match
            && self
                .match_expressions
                .as_ref()
                .is_none_or(|exprs| exprs.iter().all(|expr| expr.matches(labels)))
    }
}

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// An array of string values. If the operator is In or `NotIn`,
    /// the values array must be non-empty. If the operator is Exists or `DoesNotExist`,
    /// the values array must be empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl LabelSelectorRequirement {
    /// Evaluates one requirement. Unknown operators never match.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let values = self.values.as_deref().unwrap_or_default();
        match self.operator.as_str() {
            "In" => labels.get(&self.key).is_some_and(|v| values.contains(v)),
            "NotIn" => labels.get(&self.key).is_none_or(|v| !values.contains(v)),
            "Exists" => labels.contains_key(&self.key),
            "DoesNotExist" => !labels.contains_key(&self.key),
            _ => false,
        }
    }
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, `ClustersReconciled`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Reference to a `Secret` in a specific namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

impl SecretRef {
    #[must_use]
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// Scope in which AKO creates Avi objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TenantContext {
    /// Objects are created in the provider context (Avi `admin` tenant semantics)
    #[default]
    Provider,
    /// Objects are created in the tenant's own context
    Tenant,
}

/// Avi tenant targeted by AKO.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AviTenant {
    #[serde(default)]
    pub context: TenantContext,
    pub name: String,
}

/// A contiguous range of VIP addresses inside the data network.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IpPool {
    /// First address of the pool
    pub start: String,
    /// Last address of the pool (inclusive)
    pub end: String,
    /// Address family; only `V4` is supported
    #[serde(rename = "type")]
    pub pool_type: String,
}

impl IpPool {
    #[must_use]
    pub fn v4(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            pool_type: "V4".to_string(),
        }
    }
}

/// Network VIPs are allocated from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataNetwork {
    pub name: String,
    /// CIDR of the network, e.g. `10.0.0.0/24`
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_pools: Vec<IpPool>,
}

/// Network the control-plane HA VIP is allocated from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ControlPlaneNetwork {
    pub name: String,
    pub cidr: String,
}

/// AKO log persistence settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AkoLogConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persistent_volume_claim: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_file: String,
}

/// AKO access-control settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AkoRbacConfig {
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "pspPolicyAPIVersion")]
    pub psp_policy_api_version: String,
    #[serde(default)]
    pub psp_enabled: bool,
}

/// Virtual-service sharding size for L7 ingress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShardVsSize {
    Small,
    #[default]
    Medium,
    Large,
    Dedicated,
}

/// How AKO reaches backend pods for ingress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IngressServiceType {
    #[default]
    NodePort,
    ClusterIP,
    NodePortLocal,
}

/// Node network and its CIDRs, used by AKO for static routes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetwork {
    pub network_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
}

/// AKO ingress settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AkoIngressConfig {
    #[serde(default)]
    pub disable_ingress_class: bool,
    #[serde(default)]
    pub default_ingress_controller: bool,
    #[serde(default, rename = "shardVSSize", skip_serializing_if = "Option::is_none")]
    pub shard_vs_size: Option<ShardVsSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<IngressServiceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_network_list: Vec<NodeNetwork>,
}

/// Optional AKO tuning.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtraConfigs {
    #[serde(default)]
    pub log: AkoLogConfig,
    #[serde(default)]
    pub rbac: AkoRbacConfig,
    #[serde(default)]
    pub ingress: AkoIngressConfig,
    #[serde(default)]
    pub disable_static_route_sync: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cni_plugin: String,
    /// AKO log level (INFO, DEBUG, WARN, ERROR)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// `AKODeploymentConfig` declares how AKO is installed and configured on every cluster
/// selected by its `clusterSelector`.
///
/// The configuration named `install-ako-for-all` is the default: its selector is empty
/// and it claims every cluster no other configuration has claimed.
///
/// # Example
///
/// ```yaml
/// apiVersion: networking.tkg.tanzu.vmware.com/v1alpha1
/// kind: AKODeploymentConfig
/// metadata:
///   name: install-ako-for-management-cluster
/// spec:
///   cloudName: Default-Cloud
///   controller: 10.0.0.2
///   serviceEngineGroup: Default-Group
///   clusterSelector:
///     matchLabels:
///       cluster-role.tkg.tanzu.vmware.com/management: ""
///   adminCredentialRef:
///     name: avi-controller-credentials
///     namespace: tkg-system-networking
///   certificateAuthorityRef:
///     name: avi-controller-ca
///     namespace: tkg-system-networking
///   dataNetwork:
///     name: VM Network
///     cidr: 10.0.0.0/24
///     ipPools:
///       - start: 10.0.0.1
///         end: 10.0.0.10
///         type: V4
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.tkg.tanzu.vmware.com",
    version = "v1alpha1",
    kind = "AKODeploymentConfig",
    shortname = "adc",
    doc = "AKODeploymentConfig describes the Avi cloud, tenant, and network settings applied to every Cluster selected by its clusterSelector."
)]
#[kube(status = "AKODeploymentConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct AKODeploymentConfigSpec {
    /// Avi cloud name
    pub cloud_name: String,

    /// Avi controller address, `[scheme://]host[:port]`
    pub controller: String,

    /// Avi controller version passed to AKO
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_version: Option<String>,

    /// Service engine group name
    pub service_engine_group: String,

    /// Selects the clusters this configuration applies to. Immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<LabelSelector>,

    /// Pre-provisioned credentials for workload clusters. When absent, a per-cluster
    /// Avi user is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_credential_ref: Option<SecretRef>,

    /// Avi admin credentials used by this operator
    pub admin_credential_ref: SecretRef,

    /// Avi controller CA (`certificateAuthorityData` key)
    pub certificate_authority_ref: SecretRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<AviTenant>,

    pub data_network: DataNetwork,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_network: Option<ControlPlaneNetwork>,

    #[serde(default)]
    pub extra_configs: ExtraConfigs,
}

/// `AKODeploymentConfig` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AKODeploymentConfigStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl AKODeploymentConfigSpec {
    /// The selector, treating an absent selector as empty.
    #[must_use]
    pub fn selector(&self) -> LabelSelector {
        self.cluster_selector.clone().unwrap_or_default()
    }

    /// Control-plane CIDR when it differs from the data CIDR.
    #[must_use]
    pub fn distinct_control_plane_cidr(&self) -> Option<&str> {
        self.control_plane_network
            .as_ref()
            .map(|n| n.cidr.as_str())
            .filter(|cidr| !cidr.is_empty() && *cidr != self.data_network.cidr)
    }
}

// ============================================================================
// Cluster API
// ============================================================================

/// Host/port pair of a cluster's API server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// Subset of the Cluster API `Cluster` spec this operator reads and writes.
///
/// Writes go through JSON merge patches, so unknown fields are never clobbered.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Address reported for a `Machine`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineAddress {
    #[serde(rename = "type", default)]
    pub address_type: String,
    pub address: String,
}

/// Cluster API `Machine` status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,
}

/// Subset of the Cluster API `Machine` spec this operator reads.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    schema = "disabled"
)]
#[kube(status = "MachineStatus")]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub cluster_name: String,
}

// ============================================================================
// AKO
// ============================================================================

/// AKO `AviInfraSetting`; only its existence is consulted.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "ako.vmware.com",
    version = "v1alpha1",
    kind = "AviInfraSetting",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AviInfraSettingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se_group: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<serde_json::Value>,
}
