// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! AKO addon payload.
//!
//! The distribution agent installs AKO on a workload cluster from a secret holding
//! a `values.yaml` document. This module builds that document from an
//! `AKODeploymentConfig`, the target `Cluster`, and the credentials issued for it,
//! and wraps it in the addon secret.

use crate::avi::AviCredentials;
use crate::constants::{
    ADDON_SECRET_TYPE, ADDON_VALUES_KEY, AKO_ADDON_NAME, API_SERVER_PORT, AVI_NAMESPACE,
    DEFAULT_CONTROLLER_VERSION, TKG_SYSTEM_NAMESPACE,
};
use crate::crd::{AKODeploymentConfig, Cluster, NodeNetwork};
use crate::errors::ReconcileError;
use crate::labels::{
    ADDON_VALUES_CHECKSUM_ANNOTATION, AVI_CLUSTER_DELETE_CONFIG_LABEL, TKG_ADDON_LABEL,
    TKG_CLUSTER_NAME_LABEL,
};
use crate::validation::parse_cidr;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Header the distribution agent expects at the top of a data-values document.
pub const VALUES_HEADER: &str = "#@data/values\n#@overlay/match-child-defaults missing_ok=True\n---\n";

const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_FULL_SYNC_FREQUENCY: &str = "1800";

/// Root of the values document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonValues {
    pub load_balancer_and_ingress_service: LoadBalancerAndIngressService,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerAndIngressService {
    pub name: String,
    pub namespace: String,
    pub config: AkoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AkoConfig {
    pub is_cluster_service: String,
    pub replica_count: i32,
    pub ako_settings: AkoSettings,
    pub network_settings: NetworkSettings,
    pub l7_settings: L7Settings,
    pub l4_settings: L4Settings,
    pub controller_settings: ControllerSettings,
    pub nodeport_selector: NodePortSelector,
    pub rbac: RbacSettings,
    pub persistent_volume_claim: String,
    pub mount_path: String,
    pub log_file: String,
    pub avi_credentials: CredentialValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AkoSettings {
    pub log_level: String,
    pub full_sync_frequency: String,
    pub api_server_port: i32,
    /// `"true"` asks AKO to remove everything it created on the Avi controller.
    pub delete_config: String,
    pub disable_static_route_sync: String,
    pub cluster_name: String,
    pub cni_plugin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSettings {
    pub subnet_ip: String,
    pub subnet_prefix: String,
    pub network_name: String,
    pub control_plane_network_name: String,
    pub control_plane_network_cidr: String,
    /// JSON-encoded list, as AKO reads it
    pub node_network_list: String,
    /// JSON-encoded list, as AKO reads it
    pub vip_network_list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct L7Settings {
    pub disable_ingress_class: bool,
    pub default_ing_controller: bool,
    pub shard_vs_size: String,
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct L4Settings {
    pub default_domain: String,
    pub auto_fqdn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSettings {
    pub service_engine_group_name: String,
    pub controller_version: String,
    pub cloud_name: String,
    pub controller_ip: String,
    pub tenant_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePortSelector {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RbacSettings {
    pub psp_enabled: bool,
    pub psp_policy_api_version: String,
}

#[derive(Clone, PartialEq, Serialize)]
pub struct CredentialValues {
    pub username: String,
    pub password: String,
    pub certificate_authority_data: String,
}

impl std::fmt::Debug for CredentialValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialValues")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VipNetwork<'a> {
    network_name: &'a str,
    cidr: &'a str,
}

/// True when AKO should tear down its Avi objects on uninstall.
///
/// Requires the delete-request label set to `true`. Clusters in `tkg-system`
/// (the management cluster) never request it.
#[must_use]
pub fn delete_config_requested(cluster: &Cluster) -> bool {
    cluster.namespace().as_deref() != Some(TKG_SYSTEM_NAMESPACE)
        && cluster
            .labels()
            .get(AVI_CLUSTER_DELETE_CONFIG_LABEL)
            .is_some_and(|v| v == "true")
}

/// Name of the addon secret for `cluster`.
#[must_use]
pub fn addon_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-{AKO_ADDON_NAME}-addon")
}

impl AddonValues {
    /// Builds the values for `cluster` under `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Validation`] when the data network CIDR does not
    /// parse, and [`ReconcileError::Serialization`] if the network lists cannot be
    /// encoded.
    pub fn new(
        config: &AKODeploymentConfig,
        cluster: &Cluster,
        credentials: &AviCredentials,
    ) -> Result<Self, ReconcileError> {
        let spec = &config.spec;
        let cluster_name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let qualified = format!("{namespace}-{cluster_name}");

        let data_cidr = parse_cidr(&spec.data_network.cidr).map_err(|reason| {
            ReconcileError::Validation {
                kind: "AKODeploymentConfig".to_string(),
                name: config.name_any(),
                reason: format!("data network cidr {}: {reason}", spec.data_network.cidr),
            }
        })?;

        let vip_networks = [VipNetwork {
            network_name: &spec.data_network.name,
            cidr: &spec.data_network.cidr,
        }];
        let node_networks: &[NodeNetwork] = &spec.extra_configs.ingress.node_network_list;

        let control_plane = spec.control_plane_network.clone().unwrap_or_default();
        let ingress = &spec.extra_configs.ingress;
        let log = &spec.extra_configs.log;

        Ok(Self {
            load_balancer_and_ingress_service: LoadBalancerAndIngressService {
                name: format!("ako-{qualified}"),
                namespace: AVI_NAMESPACE.to_string(),
                config: AkoConfig {
                    is_cluster_service: String::new(),
                    replica_count: 1,
                    ako_settings: AkoSettings {
                        log_level: spec
                            .extra_configs
                            .log_level
                            .clone()
                            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
                        full_sync_frequency: DEFAULT_FULL_SYNC_FREQUENCY.to_string(),
                        api_server_port: API_SERVER_PORT,
                        delete_config: delete_config_requested(cluster).to_string(),
                        disable_static_route_sync: spec
                            .extra_configs
                            .disable_static_route_sync
                            .to_string(),
                        cluster_name: qualified.clone(),
                        cni_plugin: spec.extra_configs.cni_plugin.clone(),
                    },
                    network_settings: NetworkSettings {
                        subnet_ip: data_cidr.network().to_string(),
                        subnet_prefix: data_cidr.prefix().to_string(),
                        network_name: spec.data_network.name.clone(),
                        control_plane_network_name: control_plane.name,
                        control_plane_network_cidr: control_plane.cidr,
                        node_network_list: serde_json::to_string(node_networks)?,
                        vip_network_list: serde_json::to_string(&vip_networks)?,
                    },
                    l7_settings: L7Settings {
                        disable_ingress_class: ingress.disable_ingress_class,
                        default_ing_controller: ingress.default_ingress_controller,
                        shard_vs_size: json_enum_text(&ingress.shard_vs_size.unwrap_or_default())?,
                        service_type: json_enum_text(&ingress.service_type.unwrap_or_default())?,
                    },
                    l4_settings: L4Settings {
                        default_domain: String::new(),
                        auto_fqdn: "disabled".to_string(),
                    },
                    controller_settings: ControllerSettings {
                        service_engine_group_name: spec.service_engine_group.clone(),
                        controller_version: spec
                            .controller_version
                            .clone()
                            .unwrap_or_else(|| DEFAULT_CONTROLLER_VERSION.to_string()),
                        cloud_name: spec.cloud_name.clone(),
                        controller_ip: spec.controller.clone(),
                        tenant_name: spec
                            .tenant
                            .as_ref()
                            .map(|t| t.name.clone())
                            .unwrap_or_else(|| "admin".to_string()),
                    },
                    nodeport_selector: NodePortSelector {
                        key: String::new(),
                        value: String::new(),
                    },
                    rbac: RbacSettings {
                        psp_enabled: spec.extra_configs.rbac.psp_enabled,
                        psp_policy_api_version: spec.extra_configs.rbac.psp_policy_api_version.clone(),
                    },
                    persistent_volume_claim: log.persistent_volume_claim.clone(),
                    mount_path: log.mount_path.clone(),
                    log_file: log.log_file.clone(),
                    avi_credentials: CredentialValues {
                        username: credentials.username.clone(),
                        password: credentials.password.clone(),
                        certificate_authority_data: credentials.certificate_authority_data.clone(),
                    },
                },
            },
        })
    }

    /// Renders the document with the data-values header.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Serialization`] if YAML encoding fails.
    pub fn to_values_yaml(&self) -> Result<String, ReconcileError> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("{VALUES_HEADER}{body}"))
    }
}

fn json_enum_text<T: Serialize>(value: &T) -> Result<String, ReconcileError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Hex SHA-256 of a rendered values document.
#[must_use]
pub fn values_checksum(values_yaml: &str) -> String {
    format!("{:x}", Sha256::digest(values_yaml.as_bytes()))
}

/// Wraps rendered values in the addon secret for `cluster`.
///
/// The secret lives next to the cluster, is owned by it, and records the values
/// checksum so unchanged payloads are not rewritten.
#[must_use]
pub fn build_addon_secret(cluster: &Cluster, values_yaml: &str) -> Secret {
    let cluster_name = cluster.name_any();

    let labels = BTreeMap::from([
        (TKG_ADDON_LABEL.to_string(), AKO_ADDON_NAME.to_string()),
        (TKG_CLUSTER_NAME_LABEL.to_string(), cluster_name.clone()),
    ]);
    let annotations = BTreeMap::from([(
        ADDON_VALUES_CHECKSUM_ANNOTATION.to_string(),
        values_checksum(values_yaml),
    )]);

    let owner_references = cluster.meta().uid.as_ref().map(|uid| {
        vec![OwnerReference {
            api_version: Cluster::api_version(&()).to_string(),
            kind: Cluster::kind(&()).to_string(),
            name: cluster_name.clone(),
            uid: uid.clone(),
            controller: None,
            block_owner_deletion: None,
        }]
    });

    Secret {
        metadata: ObjectMeta {
            name: Some(addon_secret_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references,
            ..Default::default()
        },
        type_: Some(ADDON_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            ADDON_VALUES_KEY.to_string(),
            ByteString(values_yaml.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Checksum recorded on an existing addon secret, if any.
#[must_use]
pub fn recorded_checksum(secret: &Secret) -> Option<&str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ADDON_VALUES_CHECKSUM_ANNOTATION))
        .map(String::as_str)
}

#[cfg(test)]
#[path = "addon_tests.rs"]
mod addon_tests;
