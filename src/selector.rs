// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ownership resolution between `AKODeploymentConfig`s and `Cluster`s.
//!
//! Several configurations may select the same cluster. This module decides which
//! one owns it and which configurations must be reconciled when a cluster changes.
//! Everything here is a pure function of labels and the configuration set.
//!
//! # Precedence
//!
//! 1. Configurations being deleted never claim anything.
//! 2. A non-default configuration claims a cluster when its non-empty selector
//!    matches. Ownership is sticky: the configuration named by the cluster's
//!    ownership label keeps the cluster for as long as it still matches.
//! 3. Otherwise the lexicographically smallest matching name wins.
//! 4. The default configuration (`install-ako-for-all`, empty selector) claims
//!    whatever is left, except clusters carrying the non-default marker label.
//!    The marker is cleared when the previous owner releases the cluster.
//!
//! # Example
//!
//! ```rust,no_run
//! use ako_operator::selector::find_configs_for_cluster;
//! use ako_operator::crd::{AKODeploymentConfig, Cluster};
//! use kube::runtime::reflector::Store;
//!
//! # fn example(store: Store<AKODeploymentConfig>, cluster: Cluster) {
//! // Configurations to reconcile after this cluster changed
//! let requests = find_configs_for_cluster(&store, &cluster);
//! # }
//! ```

use crate::constants::DEFAULT_ADC_NAME;
use crate::crd::{AKODeploymentConfig, Cluster};
use crate::labels::{AVI_CLUSTER_LABEL, AVI_CLUSTER_SELECTED_LABEL};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// True for the reserved default configuration.
#[must_use]
pub fn is_default_config(config: &AKODeploymentConfig) -> bool {
    config.name_any() == DEFAULT_ADC_NAME && config.spec.selector().is_empty()
}

fn is_deleting(config: &AKODeploymentConfig) -> bool {
    config.metadata.deletion_timestamp.is_some()
}

/// Whether `config` is eligible to claim a cluster with `labels`, ignoring
/// stickiness and tie-breaks.
#[must_use]
pub fn config_selects(config: &AKODeploymentConfig, labels: &BTreeMap<String, String>) -> bool {
    if is_deleting(config) {
        return false;
    }
    let selector = config.spec.selector();
    if selector.is_empty() {
        is_default_config(config) && !labels.contains_key(AVI_CLUSTER_SELECTED_LABEL)
    } else {
        selector.matches(labels)
    }
}

/// Decides which configuration owns a cluster with the given labels.
///
/// Returns `None` when nothing may claim the cluster, including the case where a
/// non-default marker is still present after the previous owner stopped matching.
pub fn resolve_owner<'a, I>(labels: &BTreeMap<String, String>, configs: I) -> Option<String>
where
    I: IntoIterator<Item = &'a AKODeploymentConfig>,
{
    let mut candidates: BTreeSet<String> = BTreeSet::new();
    let mut default_available = false;

    for config in configs {
        if is_deleting(config) {
            continue;
        }
        let selector = config.spec.selector();
        if selector.is_empty() {
            if is_default_config(config) {
                default_available = true;
            } else {
                debug!(
                    config = %config.name_any(),
                    "Ignoring non-default AKODeploymentConfig with an empty selector"
                );
            }
            continue;
        }
        if selector.matches(labels) {
            candidates.insert(config.name_any());
        }
    }

    if let Some(current) = labels.get(AVI_CLUSTER_LABEL) {
        if candidates.contains(current) {
            return Some(current.clone());
        }
    }

    if let Some(first) = candidates.into_iter().next() {
        return Some(first);
    }

    if default_available && !labels.contains_key(AVI_CLUSTER_SELECTED_LABEL) {
        return Some(DEFAULT_ADC_NAME.to_string());
    }

    None
}

/// Looks up the configuration owning `cluster`, if any.
#[must_use]
pub fn find_owner_config<'a>(
    cluster: &Cluster,
    configs: &'a [AKODeploymentConfig],
) -> Option<&'a AKODeploymentConfig> {
    let owner = resolve_owner(cluster.labels(), configs)?;
    configs.iter().find(|c| c.name_any() == owner)
}

/// Reconcile-request fan-out for a changed cluster.
///
/// Yields one request per eligible configuration so the winner can apply its
/// label, plus the incumbent owner named by the ownership label so it can release
/// a cluster that stopped matching.
pub fn configs_for_cluster<'a, I>(
    cluster: &Cluster,
    configs: I,
) -> Vec<ObjectRef<AKODeploymentConfig>>
where
    I: IntoIterator<Item = &'a AKODeploymentConfig>,
{
    let labels = cluster.labels();
    let incumbent = labels.get(AVI_CLUSTER_LABEL);
    let mut seen = BTreeSet::new();

    configs
        .into_iter()
        .filter(|config| {
            config_selects(config, labels)
                || incumbent.is_some_and(|name| *name == config.name_any())
        })
        .filter(|config| seen.insert(config.name_any()))
        .map(ObjectRef::from_obj)
        .collect()
}

/// [`configs_for_cluster`] over a reflector store, for use in a watch mapper.
pub fn find_configs_for_cluster(
    store: &Store<AKODeploymentConfig>,
    cluster: &Cluster,
) -> Vec<ObjectRef<AKODeploymentConfig>> {
    let state = store.state();
    configs_for_cluster(cluster, state.iter().map(AsRef::as_ref))
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
