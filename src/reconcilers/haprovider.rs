// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Control-plane HA endpoint synchronization.
//!
//! When Avi is the control-plane HA provider, every cluster gets a `LoadBalancer`
//! service `<namespace>-<cluster>-control-plane` plus a selector-less `Endpoints`
//! object of the same name listing its control-plane machines. AKO programs a
//! virtual service from them; the VIP it reports is copied into
//! `Cluster.spec.controlPlaneEndpoint`.
//!
//! # Endpoint membership
//!
//! Members are keyed by machine identity: each address carries a `targetRef` to its
//! `Machine` (kind, name, uid) and the machine name as `nodeName`. Only IPv4
//! addresses are published. Terminating machines are removed.
//!
//! # Example
//!
//! ```rust,no_run
//! use ako_operator::reconcilers::haprovider::{HaProvider, SystemResolver};
//! use ako_operator::settings::OperatorSettings;
//! use kube::Client;
//! use std::sync::Arc;
//!
//! # async fn example(client: Client) {
//! let provider = HaProvider::new(client, OperatorSettings::default(), Arc::new(SystemResolver));
//! # }
//! ```

use crate::constants::{
    API_SERVER_PORT, HA_SERVICE_NAME_SUFFIX, KIND_MACHINE, MAX_CONFLICT_RETRIES,
    TKG_SYSTEM_NAMESPACE,
};
use crate::crd::{AKODeploymentConfig, ApiEndpoint, AviInfraSetting, Cluster, Machine};
use crate::errors::ReconcileError;
use crate::labels::{
    CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION, CLUSTER_NAME_LABEL, HA_AVI_INFRA_SETTING_ANNOTATION,
    HA_SERVICE_ANNOTATION, HA_SERVICE_BOOTSTRAP_CLUSTER_FINALIZER, MACHINE_CONTROL_PLANE_LABEL,
    TKG_CLUSTER_NAME_ANNOTATION, TKG_CLUSTER_NAMESPACE_ANNOTATION,
    TKG_MANAGEMENT_CLUSTER_ROLE_LABEL,
};
use crate::selector::find_owner_config;
use crate::settings::OperatorSettings;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::PostParams;
use kube::runtime::reflector::ObjectRef;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Host resolution
// ============================================================================

/// Resolves a control-plane endpoint hostname to an address.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ReconcileError>;
}

/// Resolver backed by the system resolver; prefers IPv4.
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ReconcileError> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| ReconcileError::Transport {
                target: format!("dns ({host})"),
                reason: e.to_string(),
            })?
            .map(|a| a.ip())
            .collect();

        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| ReconcileError::Transport {
                target: format!("dns ({host})"),
                reason: "no addresses returned".to_string(),
            })
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// `<namespace>-<cluster>-control-plane`
#[must_use]
pub fn ha_service_name(namespace: &str, cluster_name: &str) -> String {
    format!("{namespace}-{cluster_name}-{HA_SERVICE_NAME_SUFFIX}")
}

/// `<config>-ais`
#[must_use]
pub fn avi_infra_setting_name(config: &AKODeploymentConfig) -> String {
    format!("{}-ais", config.name_any())
}

/// Cluster a HA service belongs to, read from its annotations.
#[must_use]
pub fn cluster_for_service(service: &Service) -> Option<ObjectRef<Cluster>> {
    let annotations = service.annotations();
    let name = annotations.get(TKG_CLUSTER_NAME_ANNOTATION)?;
    let namespace = annotations.get(TKG_CLUSTER_NAMESPACE_ANNOTATION)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// True for machines carrying the Cluster API control-plane label.
#[must_use]
pub fn is_control_plane_machine(machine: &Machine) -> bool {
    machine.labels().contains_key(MACHINE_CONTROL_PLANE_LABEL)
}

/// Name of the cluster a machine belongs to.
#[must_use]
pub fn machine_cluster_name(machine: &Machine) -> Option<String> {
    Some(machine.spec.cluster_name.clone())
        .filter(|n| !n.is_empty())
        .or_else(|| machine.labels().get(CLUSTER_NAME_LABEL).cloned())
}

/// First IPv4 address reported for the machine.
#[must_use]
pub fn machine_ipv4(machine: &Machine) -> Option<Ipv4Addr> {
    machine
        .status
        .as_ref()?
        .addresses
        .iter()
        .find_map(|a| a.address.parse::<Ipv4Addr>().ok())
}

fn machine_address(machine: &Machine, ip: Ipv4Addr) -> EndpointAddress {
    EndpointAddress {
        ip: ip.to_string(),
        node_name: Some(machine.name_any()),
        target_ref: Some(ObjectReference {
            kind: Some(KIND_MACHINE.to_string()),
            name: Some(machine.name_any()),
            namespace: machine.namespace(),
            uid: machine.uid(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn api_server_port() -> EndpointPort {
    EndpointPort {
        port: API_SERVER_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// True if `address` belongs to `machine`: by uid when the member has a target
/// reference, by any reported IP otherwise.
fn address_belongs_to(address: &EndpointAddress, machine: &Machine) -> bool {
    match address.target_ref.as_ref() {
        Some(target) => match (&target.uid, machine.uid()) {
            (Some(a), Some(b)) => *a == b,
            _ => target.name.as_deref() == Some(machine.name_any().as_str()),
        },
        None => machine
            .status
            .as_ref()
            .is_some_and(|s| s.addresses.iter().any(|a| a.address == address.ip)),
    }
}

/// Publishes the machine's IPv4 address. Returns true if the member list changed.
///
/// A machine already listed with the same address is left alone; a stale address
/// for the same machine is replaced.
pub fn add_machine_address(endpoints: &mut Endpoints, machine: &Machine) -> bool {
    let Some(ip) = machine_ipv4(machine) else {
        debug!(machine = %machine.name_any(), "Machine has no IPv4 address yet");
        return false;
    };
    let desired = machine_address(machine, ip);

    let subsets = endpoints.subsets.get_or_insert_with(Vec::new);
    if subsets.is_empty() {
        subsets.push(EndpointSubset {
            addresses: Some(Vec::new()),
            ports: Some(vec![api_server_port()]),
            ..Default::default()
        });
    }
    let addresses = subsets[0].addresses.get_or_insert_with(Vec::new);

    if addresses.iter().any(|a| *a == desired) {
        return false;
    }
    addresses.retain(|a| !address_belongs_to(a, machine));
    addresses.push(desired);
    addresses.sort_by(|a, b| a.ip.cmp(&b.ip));
    true
}

/// Drops every member belonging to the machine. Returns true if any was removed.
pub fn remove_machine_address(endpoints: &mut Endpoints, machine: &Machine) -> bool {
    let Some(subset) = endpoints.subsets.as_mut().and_then(|s| s.first_mut()) else {
        return false;
    };
    let Some(addresses) = subset.addresses.as_mut() else {
        return false;
    };

    let before = addresses.len();
    addresses.retain(|a| !address_belongs_to(a, machine));
    let removed = addresses.len() != before;

    if addresses.is_empty() {
        endpoints.subsets = None;
    }
    removed
}

/// The complete member list for a cluster's live control-plane machines.
#[must_use]
pub fn desired_subsets(machines: &[Machine]) -> Option<Vec<EndpointSubset>> {
    let mut addresses: Vec<EndpointAddress> = machines
        .iter()
        .filter(|m| is_control_plane_machine(m) && m.meta().deletion_timestamp.is_none())
        .filter_map(|m| machine_ipv4(m).map(|ip| machine_address(m, ip)))
        .collect();
    if addresses.is_empty() {
        return None;
    }
    addresses.sort_by(|a, b| a.ip.cmp(&b.ip));

    Some(vec![EndpointSubset {
        addresses: Some(addresses),
        ports: Some(vec![api_server_port()]),
        ..Default::default()
    }])
}

/// Annotations for a new HA service.
///
/// The infra-setting annotation is added when the owning configuration's
/// `AviInfraSetting` exists. A management cluster whose owner separates the
/// control-plane network from the data network cannot proceed without it.
///
/// # Errors
///
/// Returns a retryable `NotFound` for the missing `AviInfraSetting` case above.
pub fn service_annotations(
    cluster: &Cluster,
    owner: Option<&AKODeploymentConfig>,
    infra_setting_exists: bool,
) -> Result<BTreeMap<String, String>, ReconcileError> {
    let mut annotations = BTreeMap::from([
        (HA_SERVICE_ANNOTATION.to_string(), "true".to_string()),
        (TKG_CLUSTER_NAME_ANNOTATION.to_string(), cluster.name_any()),
        (
            TKG_CLUSTER_NAMESPACE_ANNOTATION.to_string(),
            cluster.namespace().unwrap_or_default(),
        ),
    ]);

    let Some(config) = owner else {
        return Ok(annotations);
    };
    let infra_setting = avi_infra_setting_name(config);

    let is_management = cluster
        .labels()
        .contains_key(TKG_MANAGEMENT_CLUSTER_ROLE_LABEL);
    if is_management
        && config.spec.distinct_control_plane_cidr().is_some()
        && !infra_setting_exists
    {
        return Err(ReconcileError::pending("AviInfraSetting", &infra_setting));
    }

    if infra_setting_exists {
        annotations.insert(HA_AVI_INFRA_SETTING_ANNOTATION.to_string(), infra_setting);
    }
    Ok(annotations)
}

/// The HA `LoadBalancer` service for a cluster.
///
/// `tkg-system` services carry a finalizer so the management cluster's endpoint
/// survives cluster moves; others are owned by their `Cluster`.
#[must_use]
pub fn build_ha_service(
    cluster: &Cluster,
    annotations: BTreeMap<String, String>,
    port: i32,
    load_balancer_ip: Option<String>,
) -> Service {
    let namespace = cluster.namespace().unwrap_or_default();
    let mut metadata = ObjectMeta {
        name: Some(ha_service_name(&namespace, &cluster.name_any())),
        namespace: Some(namespace.clone()),
        annotations: Some(annotations),
        ..Default::default()
    };

    if namespace == TKG_SYSTEM_NAMESPACE {
        metadata.finalizers = Some(vec![HA_SERVICE_BOOTSTRAP_CLUSTER_FINALIZER.to_string()]);
    } else if let Some(uid) = cluster.uid() {
        metadata.owner_references = Some(vec![OwnerReference {
            api_version: Cluster::api_version(&()).to_string(),
            kind: Cluster::kind(&()).to_string(),
            name: cluster.name_any(),
            uid,
            controller: None,
            block_owner_deletion: None,
        }]);
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(API_SERVER_PORT)),
                ..Default::default()
            }]),
            load_balancer_ip,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// First ingress IP the load balancer reported, if valid.
#[must_use]
pub fn service_ingress_ip(service: &Service) -> Option<IpAddr> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .as_deref()?
        .parse()
        .ok()
}

/// Copies the service VIP into the cluster's control-plane endpoint.
///
/// The host is the endpoint annotation when it is a hostname, the ingress IP
/// otherwise. Nothing happens until the load balancer reports an IP, and the
/// endpoint is never cleared. Returns true if the cluster changed.
pub fn update_control_plane_endpoint(cluster: &mut Cluster, service: &Service, port: i32) -> bool {
    let Some(ip) = service_ingress_ip(service) else {
        return false;
    };

    let host = cluster
        .annotations()
        .get(CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION)
        .filter(|e| !e.is_empty() && e.parse::<IpAddr>().is_err())
        .cloned()
        .unwrap_or_else(|| ip.to_string());

    let desired = ApiEndpoint { host, port };
    if cluster.spec.control_plane_endpoint.as_ref() == Some(&desired) {
        return false;
    }
    info!(
        cluster = %cluster.name_any(),
        host = %desired.host,
        port = desired.port,
        "Setting control plane endpoint"
    );
    cluster.spec.control_plane_endpoint = Some(desired);
    true
}

// ============================================================================
// Provider
// ============================================================================

/// Progress of a cluster's HA service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaServiceState {
    /// The service exists but has no VIP yet
    ServiceCreated,
    /// The VIP is known and copied into the cluster
    ServiceReady,
}

/// The address requested for the HA service: the cluster's endpoint
/// annotation, resolved through `resolver` when it is a hostname.
///
/// # Errors
///
/// Returns the resolver failure.
pub async fn requested_load_balancer_ip(
    resolver: &dyn HostResolver,
    cluster: &Cluster,
) -> Result<Option<String>, ReconcileError> {
    let Some(endpoint) = cluster
        .annotations()
        .get(CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION)
        .filter(|e| !e.is_empty())
    else {
        return Ok(None);
    };
    if endpoint.parse::<IpAddr>().is_ok() {
        return Ok(Some(endpoint.clone()));
    }
    let ip = resolver.resolve(endpoint).await?;
    debug!(endpoint = %endpoint, ip = %ip, "Resolved control plane endpoint");
    Ok(Some(ip.to_string()))
}

/// Manages HA services and endpoints for clusters.
pub struct HaProvider {
    client: Client,
    settings: OperatorSettings,
    resolver: Arc<dyn HostResolver>,
}

impl HaProvider {
    #[must_use]
    pub fn new(
        client: Client,
        settings: OperatorSettings,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            client,
            settings,
            resolver,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.settings.control_plane_ha_provider
    }

    async fn infra_setting_exists(
        &self,
        config: &AKODeploymentConfig,
    ) -> Result<bool, ReconcileError> {
        let name = avi_infra_setting_name(config);
        let api: Api<AviInfraSetting> = Api::all(self.client.clone());
        let found = api
            .get_opt(&name)
            .await
            .map_err(|e| ReconcileError::from_kube(e, "AviInfraSetting", &name))?;
        if found.is_none() {
            debug!(infra_setting = %name, "AviInfraSetting not found, skipping annotation");
        }
        Ok(found.is_some())
    }

    async fn create_service(
        &self,
        cluster: &Cluster,
        configs: &[AKODeploymentConfig],
    ) -> Result<Service, ReconcileError> {
        let owner = if self.settings.bootstrap_cluster {
            None
        } else {
            find_owner_config(cluster, configs)
        };
        let infra_setting_exists = match owner {
            Some(config) => self.infra_setting_exists(config).await?,
            None => false,
        };

        let annotations = service_annotations(cluster, owner, infra_setting_exists)?;
        let service = build_ha_service(
            cluster,
            annotations,
            self.settings.control_plane_endpoint_port,
            requested_load_balancer_ip(self.resolver.as_ref(), cluster).await?,
        );

        let namespace = cluster.namespace().unwrap_or_default();
        let name = service.name_any();
        info!(service = %format!("{namespace}/{name}"), "Creating HA service");
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), &service)
            .await
            .map_err(|e| ReconcileError::from_kube(e, "Service", &format!("{namespace}/{name}")))
    }

    /// Gets or creates the cluster's HA service, copies its VIP into
    /// `cluster.spec.controlPlaneEndpoint` (in memory), and ensures the
    /// `Endpoints` object unless running as a bootstrap cluster.
    ///
    /// # Errors
    ///
    /// Kubernetes failures, a failed endpoint hostname lookup, or the missing
    /// `AviInfraSetting` of a management cluster.
    pub async fn reconcile_ha_service(
        &self,
        cluster: &mut Cluster,
        configs: &[AKODeploymentConfig],
    ) -> Result<HaServiceState, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = ha_service_name(&namespace, &cluster.name_any());

        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let existing = api
            .get_opt(&name)
            .await
            .map_err(|e| {
                ReconcileError::from_kube(e, "Service", &format!("{namespace}/{name}"))
            })?;
        let service = match existing {
            Some(service) => service,
            None => self.create_service(cluster, configs).await?,
        };

        update_control_plane_endpoint(cluster, &service, self.settings.control_plane_endpoint_port);

        if !self.settings.bootstrap_cluster {
            self.ensure_endpoints(&namespace, &name).await?;
        }

        Ok(if service_ingress_ip(&service).is_some() {
            HaServiceState::ServiceReady
        } else {
            HaServiceState::ServiceCreated
        })
    }

    /// Gets the `Endpoints` object, creating it empty when missing.
    ///
    /// # Errors
    ///
    /// Kubernetes failures.
    pub async fn ensure_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Endpoints, ReconcileError> {
        let id = format!("{namespace}/{name}");
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        if let Some(endpoints) = api
            .get_opt(name)
            .await
            .map_err(|e| ReconcileError::from_kube(e, "Endpoints", &id))?
        {
            return Ok(endpoints);
        }

        info!(endpoints = %id, "Creating HA Endpoints");
        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            subsets: None,
        };
        api.create(&PostParams::default(), &endpoints)
            .await
            .map_err(|e| ReconcileError::from_kube(e, "Endpoints", &id))
    }

    /// Re-reads and edits the `Endpoints` object until the write sticks.
    async fn edit_endpoints<F>(
        &self,
        namespace: &str,
        name: &str,
        mut edit: F,
    ) -> Result<bool, ReconcileError>
    where
        F: FnMut(&mut Endpoints) -> bool + Send,
    {
        let id = format!("{namespace}/{name}");
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut endpoints = self.ensure_endpoints(namespace, name).await?;
            if !edit(&mut endpoints) {
                return Ok(false);
            }
            match api.replace(name, &PostParams::default(), &endpoints).await {
                Ok(_) => return Ok(true),
                Err(e) => {
                    let err = ReconcileError::from_kube(e, "Endpoints", &id);
                    if err.is_conflict() && attempt < MAX_CONFLICT_RETRIES {
                        debug!(endpoints = %id, attempt, "Endpoints changed underneath, retrying");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Adds or removes one control-plane machine's address.
    ///
    /// Non-control-plane machines and bootstrap mode are ignored.
    ///
    /// # Errors
    ///
    /// Kubernetes failures, or a conflict that persisted across retries.
    pub async fn reconcile_machine(&self, machine: &Machine) -> Result<(), ReconcileError> {
        if !is_control_plane_machine(machine) {
            debug!(machine = %machine.name_any(), "Not a control plane machine, skipping");
            return Ok(());
        }
        if self.settings.bootstrap_cluster {
            return Ok(());
        }
        let Some(cluster_name) = machine_cluster_name(machine) else {
            debug!(machine = %machine.name_any(), "Machine names no cluster, skipping");
            return Ok(());
        };

        let namespace = machine.namespace().unwrap_or_default();
        let name = ha_service_name(&namespace, &cluster_name);
        let terminating = machine.meta().deletion_timestamp.is_some();

        let changed = self
            .edit_endpoints(&namespace, &name, |endpoints| {
                if terminating {
                    remove_machine_address(endpoints, machine)
                } else {
                    add_machine_address(endpoints, machine)
                }
            })
            .await?;

        if changed {
            info!(
                machine = %machine.name_any(),
                endpoints = %format!("{namespace}/{name}"),
                removed = terminating,
                "Updated HA endpoint members"
            );
        }
        Ok(())
    }

    /// Rewrites the member list from the cluster's live machines.
    ///
    /// # Errors
    ///
    /// Kubernetes failures, or a conflict that persisted across retries.
    pub async fn sync_endpoint_members(
        &self,
        cluster: &Cluster,
        machines: &[Machine],
    ) -> Result<(), ReconcileError> {
        if self.settings.bootstrap_cluster {
            return Ok(());
        }
        let namespace = cluster.namespace().unwrap_or_default();
        let name = ha_service_name(&namespace, &cluster.name_any());
        let desired = desired_subsets(machines);

        let changed = self
            .edit_endpoints(&namespace, &name, |endpoints| {
                if endpoints.subsets == desired {
                    return false;
                }
                endpoints.subsets.clone_from(&desired);
                true
            })
            .await?;

        if changed {
            info!(endpoints = %format!("{namespace}/{name}"), "Resynchronized HA endpoint members");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "haprovider_tests.rs"]
mod haprovider_tests;
