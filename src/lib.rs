// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # AKO Operator - Avi load balancing for Cluster API clusters
//!
//! The AKO operator keeps a fleet of Cluster API workload clusters configured
//! against a shared Avi (NSX Advanced Load Balancer) controller. Each
//! `AKODeploymentConfig` selects clusters by label; the operator labels and
//! finalizes the clusters it owns, provisions a dedicated Avi user for each,
//! and renders the AKO addon values they need. When Avi is the control-plane
//! HA provider it also fronts every cluster's API servers with a
//! `LoadBalancer` service.
//!
//! ## Modules
//!
//! - [`crd`] - `AKODeploymentConfig` and the Cluster API subsets the operator reads
//! - [`selector`] - Which configuration owns a cluster
//! - [`reconcilers`] - Reconciliation logic and the cluster phase engine
//! - [`avi`] - Avi controller client
//! - [`permissions`] - Idempotent role privilege sync
//! - [`addon`] - AKO addon values
//! - [`validation`] - Admission checks for `AKODeploymentConfig`
//! - [`context`] - Shared context and reflector stores for controllers
//!
//! ## Example
//!
//! ```rust,no_run
//! use ako_operator::crd::{AKODeploymentConfig, AKODeploymentConfigSpec, LabelSelector};
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
//!     ..Default::default()
//! };
//! let config = AKODeploymentConfig::new("team-a", spec);
//! ```

pub mod addon;
pub mod avi;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod permissions;
pub mod reconcilers;
pub mod selector;
pub mod settings;
pub mod status_reasons;
pub mod validation;

#[cfg(test)]
mod errors_tests;
#[cfg(test)]
mod permissions_tests;
#[cfg(test)]
mod status_reasons_tests;
