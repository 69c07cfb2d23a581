// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `akodeploymentconfig.rs`

use super::*;
use crate::constants::DEFAULT_ADC_NAME;
use crate::crd::{AKODeploymentConfigSpec, ClusterSpec, LabelSelector};
use crate::labels::AVI_CLUSTER_SELECTED_LABEL;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::jiff::Timestamp;
use std::collections::BTreeMap;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn create_test_config(name: &str, match_labels: &[(&str, &str)]) -> AKODeploymentConfig {
    AKODeploymentConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: AKODeploymentConfigSpec {
            cluster_selector: (!match_labels.is_empty()).then(|| LabelSelector {
                match_labels: Some(labels(match_labels)),
                match_expressions: None,
            }),
            ..Default::default()
        },
        status: None,
    }
}

fn create_test_cluster(name: &str, cluster_labels: &[(&str, &str)]) -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(labels(cluster_labels)),
            ..Default::default()
        },
        spec: ClusterSpec::default(),
    }
}

fn names(clusters: &[Cluster]) -> Vec<String> {
    clusters.iter().map(ResourceExt::name_any).collect()
}

// ----------------------------------------------------------------------------
// partition_clusters
// ----------------------------------------------------------------------------

#[test]
fn test_partition_owned_by_selector() {
    let custom = create_test_config("custom", &[("team", "a")]);
    let configs = vec![custom.clone()];
    let clusters = vec![
        create_test_cluster("wc-a", &[("team", "a")]),
        create_test_cluster("wc-b", &[("team", "b")]),
    ];

    let partition = partition_clusters(&custom, clusters, &configs);
    assert_eq!(names(&partition.owned), vec!["wc-a"]);
    assert!(partition.stale.is_empty());
}

#[test]
fn test_partition_default_skips_clusters_claimed_by_custom() {
    let default = create_test_config(DEFAULT_ADC_NAME, &[]);
    let custom = create_test_config("custom", &[("team", "a")]);
    let configs = vec![default.clone(), custom.clone()];
    let clusters = vec![
        create_test_cluster("wc-a", &[("team", "a")]),
        create_test_cluster("wc-b", &[("team", "b")]),
    ];

    let default_partition = partition_clusters(&default, clusters.clone(), &configs);
    assert_eq!(names(&default_partition.owned), vec!["wc-b"]);

    let custom_partition = partition_clusters(&custom, clusters, &configs);
    assert_eq!(names(&custom_partition.owned), vec!["wc-a"]);
}

#[test]
fn test_partition_releases_cluster_that_stopped_matching() {
    let custom = create_test_config("custom", &[("team", "a")]);
    let configs = vec![custom.clone()];
    let clusters = vec![create_test_cluster(
        "wc-a",
        &[
            ("team", "b"),
            (AVI_CLUSTER_LABEL, "custom"),
            (AVI_CLUSTER_SELECTED_LABEL, ""),
        ],
    )];

    let partition = partition_clusters(&custom, clusters, &configs);
    assert!(partition.owned.is_empty());
    assert_eq!(names(&partition.stale), vec!["wc-a"]);
}

#[test]
fn test_partition_sticky_owner_is_not_stale_for_incumbent() {
    let first = create_test_config("a-first", &[("env", "prod")]);
    let second = create_test_config("b-second", &[("env", "prod")]);
    let configs = vec![first.clone(), second.clone()];
    let clusters = vec![create_test_cluster(
        "wc-1",
        &[("env", "prod"), (AVI_CLUSTER_LABEL, "b-second")],
    )];

    let partition = partition_clusters(&second, clusters.clone(), &configs);
    assert_eq!(names(&partition.owned), vec!["wc-1"]);

    let partition = partition_clusters(&first, clusters, &configs);
    assert!(partition.owned.is_empty());
    assert!(partition.stale.is_empty());
}

#[test]
fn test_partition_deleting_config_only_touches_labelled_clusters() {
    let mut custom = create_test_config("custom", &[("team", "a")]);
    custom.metadata.deletion_timestamp = Some(Time(Timestamp::now()));
    let configs = vec![custom.clone()];
    let clusters = vec![
        create_test_cluster("wc-labelled", &[("team", "a"), (AVI_CLUSTER_LABEL, "custom")]),
        create_test_cluster("wc-unlabelled", &[("team", "a")]),
        create_test_cluster("wc-other", &[("team", "a"), (AVI_CLUSTER_LABEL, "other")]),
    ];

    let partition = partition_clusters(&custom, clusters, &configs);
    assert_eq!(names(&partition.owned), vec!["wc-labelled"]);
    assert!(partition.stale.is_empty());
}

// ----------------------------------------------------------------------------
// clusters_condition
// ----------------------------------------------------------------------------

#[test]
fn test_condition_all_reconciled() {
    let result = Ok(PhaseRunSummary {
        requeue_after: None,
        processed: 2,
    });
    let (status, reason, message) = clusters_condition(2, 0, &result);
    assert_eq!(status, "True");
    assert_eq!(reason, REASON_ALL_CLUSTERS_RECONCILED);
    assert_eq!(message, "2 cluster(s) reconciled");
}

#[test]
fn test_condition_no_clusters() {
    let (status, reason, _) = clusters_condition(0, 0, &Ok(PhaseRunSummary::default()));
    assert_eq!(status, "True");
    assert_eq!(reason, REASON_NO_CLUSTERS);
}

#[test]
fn test_condition_requeue() {
    let result = Ok(PhaseRunSummary {
        requeue_after: Some(Duration::from_secs(30)),
        processed: 1,
    });
    assert_eq!(clusters_condition(1, 0, &result).1, REASON_PROGRESSING);
    assert_eq!(clusters_condition(0, 1, &result).1, REASON_RELEASING_CLUSTERS);
}

#[test]
fn test_condition_failure_carries_message() {
    let result = Err(ReconcileError::pending("Secret", "default/wc-1-avi-credentials")
        .for_cluster("default/wc-1"));
    let (status, reason, message) = clusters_condition(1, 0, &result);
    assert_eq!(status, "False");
    assert_eq!(reason, REASON_PARTIAL_FAILURE);
    assert!(message.contains("default/wc-1"));
}

// ----------------------------------------------------------------------------
// merge_runs
// ----------------------------------------------------------------------------

#[test]
fn test_merge_runs_keeps_shortest_requeue() {
    let merged = merge_runs(
        Ok(PhaseRunSummary {
            requeue_after: Some(Duration::from_secs(60)),
            processed: 1,
        }),
        Ok(PhaseRunSummary {
            requeue_after: Some(Duration::from_secs(30)),
            processed: 2,
        }),
    )
    .unwrap();
    assert_eq!(merged.requeue_after, Some(Duration::from_secs(30)));
    assert_eq!(merged.processed, 3);
}

#[test]
fn test_merge_runs_flattens_errors() {
    let a = Err(ReconcileError::Aggregate(vec![
        ReconcileError::InvariantViolation("a".to_string()),
        ReconcileError::InvariantViolation("b".to_string()),
    ]));
    let b = Err(ReconcileError::InvariantViolation("c".to_string()));

    match merge_runs(a, b) {
        Err(ReconcileError::Aggregate(errors)) => assert_eq!(errors.len(), 3),
        other => panic!("expected aggregate, got {other:?}"),
    }
}
