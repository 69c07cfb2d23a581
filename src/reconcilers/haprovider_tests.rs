// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `haprovider.rs`

use super::*;
use crate::crd::{
    AKODeploymentConfigSpec, ClusterSpec, ControlPlaneNetwork, DataNetwork, MachineAddress,
    MachineSpec, MachineStatus,
};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use std::sync::Mutex;

fn create_test_cluster(namespace: &str, name: &str) -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        spec: ClusterSpec::default(),
    }
}

fn create_test_machine(name: &str, addresses: &[&str], control_plane: bool) -> Machine {
    let mut labels = BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), "wc-1".to_string())]);
    if control_plane {
        labels.insert(MACHINE_CONTROL_PLANE_LABEL.to_string(), String::new());
    }
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("{name}-uid")),
            labels: Some(labels),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: "wc-1".to_string(),
        },
        status: Some(MachineStatus {
            addresses: addresses
                .iter()
                .map(|a| MachineAddress {
                    address_type: "InternalIP".to_string(),
                    address: (*a).to_string(),
                })
                .collect(),
        }),
    }
}

fn create_test_config(control_plane_cidr: Option<&str>) -> AKODeploymentConfig {
    AKODeploymentConfig {
        metadata: ObjectMeta {
            name: Some("install-ako-for-management-cluster".to_string()),
            ..Default::default()
        },
        spec: AKODeploymentConfigSpec {
            data_network: DataNetwork {
                name: "vip".to_string(),
                cidr: "10.1.0.0/24".to_string(),
                ip_pools: Vec::new(),
            },
            control_plane_network: control_plane_cidr.map(|cidr| ControlPlaneNetwork {
                name: "cp".to_string(),
                cidr: cidr.to_string(),
            }),
            ..Default::default()
        },
        status: None,
    }
}

fn service_with_ingress(ip: &str) -> Service {
    Service {
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn member_ips(endpoints: &Endpoints) -> Vec<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|s| s.addresses.iter().flatten())
        .map(|a| a.ip.clone())
        .collect()
}

// ----------------------------------------------------------------------------
// Naming and mapping
// ----------------------------------------------------------------------------

#[test]
fn test_ha_service_name() {
    assert_eq!(ha_service_name("default", "wc-1"), "default-wc-1-control-plane");
}

#[test]
fn test_cluster_for_service_reads_annotations() {
    let cluster = create_test_cluster("ns-a", "wc-1");
    let annotations = service_annotations(&cluster, None, false).unwrap();
    let service = build_ha_service(&cluster, annotations, 6443, None);

    let cluster_ref = cluster_for_service(&service).unwrap();
    assert_eq!(cluster_ref.name, "wc-1");
    assert_eq!(cluster_ref.namespace.as_deref(), Some("ns-a"));

    assert!(cluster_for_service(&Service::default()).is_none());
}

#[test]
fn test_machine_cluster_name_falls_back_to_label() {
    let mut machine = create_test_machine("cp-0", &[], true);
    assert_eq!(machine_cluster_name(&machine).as_deref(), Some("wc-1"));
    machine.spec.cluster_name = String::new();
    assert_eq!(machine_cluster_name(&machine).as_deref(), Some("wc-1"));
}

// ----------------------------------------------------------------------------
// Service construction
// ----------------------------------------------------------------------------

#[test]
fn test_service_annotations_base() {
    let cluster = create_test_cluster("default", "wc-1");
    let annotations = service_annotations(&cluster, None, false).unwrap();
    assert_eq!(annotations[HA_SERVICE_ANNOTATION], "true");
    assert_eq!(annotations[TKG_CLUSTER_NAME_ANNOTATION], "wc-1");
    assert_eq!(annotations[TKG_CLUSTER_NAMESPACE_ANNOTATION], "default");
    assert!(!annotations.contains_key(HA_AVI_INFRA_SETTING_ANNOTATION));
}

#[test]
fn test_service_annotations_add_infra_setting_when_present() {
    let cluster = create_test_cluster("default", "wc-1");
    let config = create_test_config(None);
    let annotations = service_annotations(&cluster, Some(&config), true).unwrap();
    assert_eq!(
        annotations[HA_AVI_INFRA_SETTING_ANNOTATION],
        "install-ako-for-management-cluster-ais"
    );
}

#[test]
fn test_management_cluster_waits_for_infra_setting() {
    let mut cluster = create_test_cluster(TKG_SYSTEM_NAMESPACE, "mgmt");
    cluster
        .labels_mut()
        .insert(TKG_MANAGEMENT_CLUSTER_ROLE_LABEL.to_string(), String::new());

    let config = create_test_config(Some("10.2.0.0/24"));
    let err = service_annotations(&cluster, Some(&config), false).unwrap_err();
    assert!(err.is_not_found());
    assert!(err.is_retryable());

    // same CIDR as the data network: nothing to wait for
    let config = create_test_config(Some("10.1.0.0/24"));
    assert!(service_annotations(&cluster, Some(&config), false).is_ok());
}

#[test]
fn test_build_service_owned_by_workload_cluster() {
    let cluster = create_test_cluster("default", "wc-1");
    let service = build_ha_service(&cluster, BTreeMap::new(), 443, Some("10.1.0.10".to_string()));

    assert_eq!(service.name_any(), "default-wc-1-control-plane");
    let owners = service.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners[0].kind, "Cluster");
    assert_eq!(owners[0].uid, "wc-1-uid");
    assert!(service.metadata.finalizers.is_none());

    let spec = service.spec.unwrap();
    assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
    assert_eq!(spec.load_balancer_ip.as_deref(), Some("10.1.0.10"));
    let port = &spec.ports.unwrap()[0];
    assert_eq!(port.port, 443);
    assert_eq!(port.target_port, Some(IntOrString::Int(API_SERVER_PORT)));
    assert_eq!(port.protocol.as_deref(), Some("TCP"));
}

#[test]
fn test_build_service_for_tkg_system_uses_finalizer() {
    let cluster = create_test_cluster(TKG_SYSTEM_NAMESPACE, "mgmt");
    let service = build_ha_service(&cluster, BTreeMap::new(), 6443, None);
    assert_eq!(
        service.finalizers(),
        &[HA_SERVICE_BOOTSTRAP_CLUSTER_FINALIZER.to_string()]
    );
    assert!(service.metadata.owner_references.is_none());
}

// ----------------------------------------------------------------------------
// Control-plane endpoint
// ----------------------------------------------------------------------------

#[test]
fn test_endpoint_waits_for_ingress() {
    let mut cluster = create_test_cluster("default", "wc-1");
    assert!(!update_control_plane_endpoint(&mut cluster, &Service::default(), 6443));
    assert!(cluster.spec.control_plane_endpoint.is_none());
}

#[test]
fn test_endpoint_copies_vip_once() {
    let mut cluster = create_test_cluster("default", "wc-1");
    let service = service_with_ingress("10.1.0.10");

    assert!(update_control_plane_endpoint(&mut cluster, &service, 6443));
    assert_eq!(
        cluster.spec.control_plane_endpoint,
        Some(ApiEndpoint {
            host: "10.1.0.10".to_string(),
            port: 6443,
        })
    );
    assert!(!update_control_plane_endpoint(&mut cluster, &service, 6443));
}

#[test]
fn test_endpoint_prefers_hostname_annotation() {
    let mut cluster = create_test_cluster("default", "wc-1");
    cluster.metadata.annotations = Some(BTreeMap::from([(
        CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION.to_string(),
        "api.wc-1.example.com".to_string(),
    )]));

    update_control_plane_endpoint(&mut cluster, &service_with_ingress("10.1.0.10"), 6443);
    assert_eq!(
        cluster.spec.control_plane_endpoint.unwrap().host,
        "api.wc-1.example.com"
    );
}

#[test]
fn test_endpoint_is_never_cleared() {
    let mut cluster = create_test_cluster("default", "wc-1");
    update_control_plane_endpoint(&mut cluster, &service_with_ingress("10.1.0.10"), 6443);

    let mut bad = service_with_ingress("not-an-ip");
    assert!(!update_control_plane_endpoint(&mut cluster, &bad, 6443));
    bad.status = None;
    assert!(!update_control_plane_endpoint(&mut cluster, &bad, 6443));
    assert_eq!(cluster.spec.control_plane_endpoint.unwrap().host, "10.1.0.10");
}

// ----------------------------------------------------------------------------
// Endpoint membership
// ----------------------------------------------------------------------------

#[test]
fn test_add_machine_address_sets_target_ref() {
    let mut endpoints = Endpoints::default();
    let machine = create_test_machine("cp-0", &["fe80::1", "10.0.0.5"], true);

    assert!(add_machine_address(&mut endpoints, &machine));
    assert!(!add_machine_address(&mut endpoints, &machine));

    let subset = &endpoints.subsets.as_ref().unwrap()[0];
    let address = &subset.addresses.as_ref().unwrap()[0];
    assert_eq!(address.ip, "10.0.0.5");
    assert_eq!(address.node_name.as_deref(), Some("cp-0"));
    let target = address.target_ref.as_ref().unwrap();
    assert_eq!(target.kind.as_deref(), Some("Machine"));
    assert_eq!(target.name.as_deref(), Some("cp-0"));
    assert_eq!(target.uid.as_deref(), Some("cp-0-uid"));
    assert_eq!(subset.ports.as_ref().unwrap()[0].port, API_SERVER_PORT);
}

#[test]
fn test_add_machine_address_ignores_ipv6_only_machine() {
    let mut endpoints = Endpoints::default();
    let machine = create_test_machine("cp-0", &["fe80::1"], true);
    assert!(!add_machine_address(&mut endpoints, &machine));
    assert!(endpoints.subsets.is_none());
}

#[test]
fn test_add_machine_address_replaces_stale_ip() {
    let mut endpoints = Endpoints::default();
    add_machine_address(&mut endpoints, &create_test_machine("cp-0", &["10.0.0.5"], true));
    add_machine_address(&mut endpoints, &create_test_machine("cp-1", &["10.0.0.6"], true));

    assert!(add_machine_address(
        &mut endpoints,
        &create_test_machine("cp-0", &["10.0.0.9"], true)
    ));
    assert_eq!(member_ips(&endpoints), vec!["10.0.0.6", "10.0.0.9"]);
}

#[test]
fn test_remove_machine_address() {
    let mut endpoints = Endpoints::default();
    let cp0 = create_test_machine("cp-0", &["10.0.0.5"], true);
    let cp1 = create_test_machine("cp-1", &["10.0.0.6"], true);
    add_machine_address(&mut endpoints, &cp0);
    add_machine_address(&mut endpoints, &cp1);

    assert!(remove_machine_address(&mut endpoints, &cp0));
    assert!(!remove_machine_address(&mut endpoints, &cp0));
    assert_eq!(member_ips(&endpoints), vec!["10.0.0.6"]);

    assert!(remove_machine_address(&mut endpoints, &cp1));
    assert!(endpoints.subsets.is_none());
}

#[test]
fn test_replacement_machine_reusing_ip_keeps_both_members() {
    let mut endpoints = Endpoints::default();
    let departing = create_test_machine("cp-0", &["10.0.0.5"], true);
    let replacement = create_test_machine("cp-3", &["10.0.0.5"], true);
    add_machine_address(&mut endpoints, &departing);

    assert!(add_machine_address(&mut endpoints, &replacement));
    assert_eq!(member_ips(&endpoints), vec!["10.0.0.5", "10.0.0.5"]);

    assert!(remove_machine_address(&mut endpoints, &departing));
    assert_eq!(member_ips(&endpoints), vec!["10.0.0.5"]);
    let remaining = &endpoints.subsets.as_ref().unwrap()[0].addresses.as_ref().unwrap()[0];
    assert_eq!(
        remaining.target_ref.as_ref().unwrap().uid.as_deref(),
        Some("cp-3-uid")
    );
}

#[test]
fn test_remove_matches_legacy_members_by_ip() {
    let mut endpoints = Endpoints {
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: "10.0.0.5".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let machine = create_test_machine("cp-0", &["10.0.0.5"], true);
    assert!(remove_machine_address(&mut endpoints, &machine));
}

#[test]
fn test_desired_subsets_only_live_control_plane_machines() {
    let mut terminating = create_test_machine("cp-2", &["10.0.0.7"], true);
    terminating.metadata.deletion_timestamp = Some(Time(Timestamp::now()));

    let machines = vec![
        create_test_machine("cp-1", &["10.0.0.6"], true),
        create_test_machine("cp-0", &["10.0.0.5"], true),
        create_test_machine("worker-0", &["10.0.0.20"], false),
        create_test_machine("cp-3", &[], true),
        terminating,
    ];

    let subsets = desired_subsets(&machines).unwrap();
    let ips: Vec<_> = subsets[0]
        .addresses
        .iter()
        .flatten()
        .map(|a| a.ip.as_str())
        .collect();
    assert_eq!(ips, vec!["10.0.0.5", "10.0.0.6"]);

    assert!(desired_subsets(&[]).is_none());
}

#[test]
fn test_desired_subsets_match_incremental_adds() {
    let machines = vec![
        create_test_machine("cp-0", &["10.0.0.5"], true),
        create_test_machine("cp-1", &["10.0.0.6"], true),
    ];
    let mut endpoints = Endpoints::default();
    for machine in machines.iter().rev() {
        add_machine_address(&mut endpoints, machine);
    }
    assert_eq!(endpoints.subsets, desired_subsets(&machines));
}

// ----------------------------------------------------------------------------
// Requested load balancer address
// ----------------------------------------------------------------------------

/// Resolver answering every lookup with one address and recording the hosts.
struct StaticResolver {
    ip: Option<IpAddr>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    fn answering(ip: Option<&str>) -> Self {
        Self {
            ip: ip.map(|ip| ip.parse().unwrap()),
            lookups: Mutex::new(Vec::new()),
        }
    }

    fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ReconcileError> {
        self.lookups.lock().unwrap().push(host.to_string());
        self.ip.ok_or_else(|| ReconcileError::Transport {
            target: format!("dns ({host})"),
            reason: "no such host".to_string(),
        })
    }
}

fn cluster_with_endpoint(endpoint: &str) -> Cluster {
    let mut cluster = create_test_cluster("default", "wc-1");
    cluster.annotations_mut().insert(
        CLUSTER_CONTROL_PLANE_ENDPOINT_ANNOTATION.to_string(),
        endpoint.to_string(),
    );
    cluster
}

#[tokio::test]
async fn test_requested_ip_resolves_hostname() {
    let resolver = StaticResolver::answering(Some("10.0.0.9"));
    let ip = requested_load_balancer_ip(&resolver, &cluster_with_endpoint("api.wc-1.example"))
        .await
        .unwrap();
    assert_eq!(ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(resolver.lookups(), vec!["api.wc-1.example"]);
}

#[tokio::test]
async fn test_requested_ip_literal_skips_resolver() {
    let resolver = StaticResolver::answering(Some("10.0.0.9"));
    let ip = requested_load_balancer_ip(&resolver, &cluster_with_endpoint("10.1.0.10"))
        .await
        .unwrap();
    assert_eq!(ip.as_deref(), Some("10.1.0.10"));

    let none = requested_load_balancer_ip(&resolver, &create_test_cluster("default", "wc-1"))
        .await
        .unwrap();
    assert!(none.is_none());
    assert!(resolver.lookups().is_empty());
}

#[tokio::test]
async fn test_requested_ip_propagates_resolver_failure() {
    let resolver = StaticResolver::answering(None);
    let err = requested_load_balancer_ip(&resolver, &cluster_with_endpoint("gone.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Transport { .. }));
    assert!(err.is_retryable());
}
