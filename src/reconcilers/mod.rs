// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for AKO resources.
//!
//! # Reconciliation Architecture
//!
//! 1. **Watch** - kube-runtime controllers watch configurations, clusters, and machines
//! 2. **Resolve** - the selection resolver decides which configuration owns each cluster
//! 3. **Phase** - the phase engine runs an ordered apply or delete list per cluster
//! 4. **Status** - outcomes are reported as conditions on the configuration
//!
//! # Available Reconcilers
//!
//! - [`reconcile_akodeploymentconfig`] - Runs cluster phases for a configuration
//! - [`reconcile_cluster`] - HA service and orphan release for a `Cluster`
//! - [`reconcile_machine`] - HA endpoint membership for a `Machine`
//!
//! # Building Blocks
//!
//! - [`phases`] - Phase engine and cluster write-back
//! - [`cluster_phases`] - The concrete apply and delete phases
//! - [`credentials`] - Per-cluster Avi user and credential secrets
//! - [`haprovider`] - Control-plane HA service and endpoints

pub mod akodeploymentconfig;
pub mod cluster;
pub mod cluster_phases;
pub mod credentials;
pub mod finalizers;
pub mod haprovider;
pub mod machine;
pub mod phases;
pub mod resources;
pub mod retry;
pub mod status;

pub use akodeploymentconfig::reconcile_akodeploymentconfig;
pub use cluster::reconcile_cluster;
pub use machine::reconcile_machine;
