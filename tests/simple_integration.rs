// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the AKO operator
//!
//! These tests need a cluster with the Cluster API and `AKODeploymentConfig`
//! CRDs installed and the operator running.
//!
//! Run with: cargo test --test simple_integration -- --ignored

use ako_operator::crd::{
    AKODeploymentConfig, AKODeploymentConfigSpec, Cluster, ClusterSpec, DataNetwork,
    LabelSelector, SecretRef,
};
use ako_operator::labels::{AVI_CLUSTER_LABEL, CLUSTER_FINALIZER};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::client::Client;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::time::Duration;

const TEST_NAMESPACE: &str = "ako-operator-integration";
const SELECTOR_LABEL: &str = "ako-operator-test/selected";

// ============================================================================
// Helper Functions
// ============================================================================

async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => {
            println!("✓ Successfully connected to Kubernetes cluster");
            Some(client)
        }
        Err(e) => {
            eprintln!("⊘ Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

async fn create_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                "managed-by".to_string(),
                "ako-operator-test".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(Box::new(e)),
    }
}

async fn delete_test_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if let Err(e) = namespaces.delete(name, &DeleteParams::default()).await {
        eprintln!("  Failed to delete namespace {name}: {e}");
    }
}

fn test_config(name: &str) -> AKODeploymentConfig {
    AKODeploymentConfig::new(
        name,
        AKODeploymentConfigSpec {
            cloud_name: "Default-Cloud".to_string(),
            controller: "127.0.0.1".to_string(),
            service_engine_group: "Default-Group".to_string(),
            cluster_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    SELECTOR_LABEL.to_string(),
                    "true".to_string(),
                )])),
                match_expressions: None,
            }),
            admin_credential_ref: SecretRef::new("avi-admin", TEST_NAMESPACE),
            certificate_authority_ref: SecretRef::new("avi-ca", TEST_NAMESPACE),
            data_network: DataNetwork {
                name: "vip".to_string(),
                cidr: "10.0.0.0/24".to_string(),
                ip_pools: Vec::new(),
            },
            ..Default::default()
        },
    )
}

fn test_cluster(name: &str) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster.metadata.labels = Some(BTreeMap::from([(
        SELECTOR_LABEL.to_string(),
        "true".to_string(),
    )]));
    cluster
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with the operator deployed"]
async fn test_crd_installed() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let crd = crds
        .get("akodeploymentconfigs.networking.tkg.tanzu.vmware.com")
        .await
        .expect("AKODeploymentConfig CRD should be installed");
    assert_eq!(crd.spec.names.kind, "AKODeploymentConfig");
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with the operator deployed"]
async fn test_selected_cluster_is_labelled_and_finalized() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    create_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("create namespace");

    let configs: Api<AKODeploymentConfig> = Api::all(client.clone());
    let clusters: Api<Cluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let config_name = "integration-adc";
    configs
        .create(&PostParams::default(), &test_config(config_name))
        .await
        .expect("create config");
    clusters
        .create(&PostParams::default(), &test_cluster("integration-wc"))
        .await
        .expect("create cluster");

    let mut labelled = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let cluster = clusters.get("integration-wc").await.expect("get cluster");
        if cluster.labels().get(AVI_CLUSTER_LABEL).map(String::as_str) == Some(config_name)
            && cluster.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
        {
            labelled = true;
            break;
        }
    }

    let _ = configs.delete(config_name, &DeleteParams::default()).await;
    let _ = clusters
        .delete("integration-wc", &DeleteParams::default())
        .await;
    delete_test_namespace(&client, TEST_NAMESPACE).await;

    assert!(labelled, "cluster was never claimed by {config_name}");
}
