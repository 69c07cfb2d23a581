// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `selector.rs`

use crate::constants::DEFAULT_ADC_NAME;
use crate::crd::{AKODeploymentConfig, AKODeploymentConfigSpec, Cluster, ClusterSpec, LabelSelector};
use crate::labels::{AVI_CLUSTER_LABEL, AVI_CLUSTER_SELECTED_LABEL};
use crate::selector::{
    config_selects, configs_for_cluster, find_configs_for_cluster, find_owner_config,
    is_default_config, resolve_owner,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::jiff::Timestamp;
use kube::runtime::reflector;
use kube::runtime::watcher;
use std::collections::BTreeMap;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn create_test_config(name: &str, match_labels: &[(&str, &str)]) -> AKODeploymentConfig {
    let selector = if match_labels.is_empty() {
        None
    } else {
        Some(LabelSelector {
            match_labels: Some(labels(match_labels)),
            match_expressions: None,
        })
    };
    AKODeploymentConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: AKODeploymentConfigSpec {
            cloud_name: "Default-Cloud".to_string(),
            cluster_selector: selector,
            ..Default::default()
        },
        status: None,
    }
}

fn deleting(mut config: AKODeploymentConfig) -> AKODeploymentConfig {
    config.metadata.deletion_timestamp = Some(Time(Timestamp::now()));
    config
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

fn names(refs: &[kube::runtime::reflector::ObjectRef<AKODeploymentConfig>]) -> Vec<String> {
    let mut names: Vec<String> = refs.iter().map(|r| r.name.clone()).collect();
    names.sort();
    names
}

#[test]
fn test_is_default_config_requires_reserved_name_and_empty_selector() {
    assert!(is_default_config(&create_test_config(DEFAULT_ADC_NAME, &[])));
    assert!(!is_default_config(&create_test_config("other", &[])));
    assert!(!is_default_config(&create_test_config(
        DEFAULT_ADC_NAME,
        &[("team", "a")]
    )));
}

#[test]
fn test_default_claims_unmarked_cluster() {
    let configs = vec![create_test_config(DEFAULT_ADC_NAME, &[])];
    let owner = resolve_owner(&labels(&[("env", "prod")]), &configs);
    assert_eq!(owner.as_deref(), Some(DEFAULT_ADC_NAME));
}

#[test]
fn test_default_never_claims_marked_cluster() {
    let configs = vec![create_test_config(DEFAULT_ADC_NAME, &[])];
    let cluster_labels = labels(&[(AVI_CLUSTER_SELECTED_LABEL, "")]);
    assert_eq!(resolve_owner(&cluster_labels, &configs), None);
    assert!(!config_selects(&configs[0], &cluster_labels));
}

#[test]
fn test_non_default_beats_default() {
    let configs = vec![
        create_test_config(DEFAULT_ADC_NAME, &[]),
        create_test_config("custom", &[("team", "a")]),
    ];
    let owner = resolve_owner(&labels(&[("team", "a")]), &configs);
    assert_eq!(owner.as_deref(), Some("custom"));
}

#[test]
fn test_smallest_name_wins_without_incumbent() {
    let configs = vec![
        create_test_config("zeta", &[("team", "a")]),
        create_test_config("alpha", &[("team", "a")]),
        create_test_config("mid", &[("team", "a")]),
    ];
    let owner = resolve_owner(&labels(&[("team", "a")]), &configs);
    assert_eq!(owner.as_deref(), Some("alpha"));
}

#[test]
fn test_incumbent_owner_is_sticky_while_it_matches() {
    let configs = vec![
        create_test_config("alpha", &[("team", "a")]),
        create_test_config("zeta", &[("team", "a")]),
    ];
    let cluster_labels = labels(&[
        ("team", "a"),
        (AVI_CLUSTER_LABEL, "zeta"),
        (AVI_CLUSTER_SELECTED_LABEL, ""),
    ]);
    assert_eq!(resolve_owner(&cluster_labels, &configs).as_deref(), Some("zeta"));
}

#[test]
fn test_incumbent_loses_when_it_stops_matching() {
    let configs = vec![
        create_test_config("x", &[("team", "a")]),
        create_test_config("y", &[("team", "b")]),
    ];
    let cluster_labels = labels(&[
        ("team", "b"),
        (AVI_CLUSTER_LABEL, "x"),
        (AVI_CLUSTER_SELECTED_LABEL, ""),
    ]);
    assert_eq!(resolve_owner(&cluster_labels, &configs).as_deref(), Some("y"));
}

#[test]
fn test_marker_blocks_default_until_released() {
    // Owner stopped matching; the default must wait for the marker to be cleared
    let configs = vec![
        create_test_config(DEFAULT_ADC_NAME, &[]),
        create_test_config("x", &[("team", "a")]),
    ];
    let marked = labels(&[(AVI_CLUSTER_LABEL, "x"), (AVI_CLUSTER_SELECTED_LABEL, "")]);
    assert_eq!(resolve_owner(&marked, &configs), None);

    let released = labels(&[]);
    assert_eq!(
        resolve_owner(&released, &configs).as_deref(),
        Some(DEFAULT_ADC_NAME)
    );
}

#[test]
fn test_deleting_configs_never_claim() {
    let configs = vec![
        deleting(create_test_config("alpha", &[("team", "a")])),
        create_test_config("beta", &[("team", "a")]),
        deleting(create_test_config(DEFAULT_ADC_NAME, &[])),
    ];
    assert_eq!(
        resolve_owner(&labels(&[("team", "a")]), &configs).as_deref(),
        Some("beta")
    );
    assert_eq!(resolve_owner(&labels(&[("team", "z")]), &configs), None);
}

#[test]
fn test_non_default_empty_selector_is_ignored() {
    let configs = vec![create_test_config("broad", &[])];
    assert_eq!(resolve_owner(&labels(&[("team", "a")]), &configs), None);
    assert!(!config_selects(&configs[0], &labels(&[])));
}

#[test]
fn test_configs_for_cluster_includes_matches_and_incumbent() {
    let configs = vec![
        create_test_config(DEFAULT_ADC_NAME, &[]),
        create_test_config("custom", &[("team", "a")]),
        create_test_config("other", &[("team", "b")]),
    ];
    // Labelled by "other" but now matches "custom"; the marker hides the default
    let cluster = create_test_cluster(
        "c1",
        &[
            ("team", "a"),
            (AVI_CLUSTER_LABEL, "other"),
            (AVI_CLUSTER_SELECTED_LABEL, ""),
        ],
    );
    let refs = configs_for_cluster(&cluster, &configs);
    assert_eq!(names(&refs), vec!["custom".to_string(), "other".to_string()]);
}

#[test]
fn test_configs_for_cluster_deduplicates() {
    let configs = vec![
        create_test_config("custom", &[("team", "a")]),
        create_test_config("custom", &[("team", "a")]),
    ];
    let cluster = create_test_cluster("c1", &[("team", "a"), (AVI_CLUSTER_LABEL, "custom")]);
    assert_eq!(configs_for_cluster(&cluster, &configs).len(), 1);
}

#[test]
fn test_find_configs_for_cluster_from_store() {
    let (reader, mut writer) = reflector::store::<AKODeploymentConfig>();
    writer.apply_watcher_event(&watcher::Event::Apply(create_test_config(DEFAULT_ADC_NAME, &[])));
    writer.apply_watcher_event(&watcher::Event::Apply(create_test_config(
        "custom",
        &[("team", "a")],
    )));

    let plain = create_test_cluster("c1", &[("env", "dev")]);
    assert_eq!(
        names(&find_configs_for_cluster(&reader, &plain)),
        vec![DEFAULT_ADC_NAME.to_string()]
    );

    let team = create_test_cluster("c2", &[("team", "a")]);
    assert_eq!(
        names(&find_configs_for_cluster(&reader, &team)),
        vec!["custom".to_string(), DEFAULT_ADC_NAME.to_string()]
    );
}

#[test]
fn test_find_owner_config_returns_winner() {
    let configs = vec![
        create_test_config(DEFAULT_ADC_NAME, &[]),
        create_test_config("custom", &[("team", "a")]),
    ];
    let cluster = create_test_cluster("c1", &[("team", "a")]);
    let owner = find_owner_config(&cluster, &configs).map(|c| c.metadata.name.clone());
    assert_eq!(owner, Some(Some("custom".to_string())));
}
