// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management.
//!
//! The `*_in_memory` helpers edit an object's metadata without any API call; the
//! cluster phases use them and the phase engine persists the result. The async
//! helpers patch the finalizer list directly, carrying the object's
//! `resourceVersion` so a concurrent writer produces a conflict instead of a lost
//! update.
//!
//! # Example
//!
//! ```rust,no_run
//! use ako_operator::crd::AKODeploymentConfig;
//! use ako_operator::labels::AKO_DEPLOYMENT_CONFIG_FINALIZER;
//! use ako_operator::reconcilers::finalizers::ensure_cluster_finalizer;
//! use kube::Client;
//!
//! # async fn example(client: Client, config: AKODeploymentConfig) -> Result<(), ako_operator::errors::ReconcileError> {
//! ensure_cluster_finalizer(&client, &config, AKO_DEPLOYMENT_CONFIG_FINALIZER).await?;
//! # Ok(())
//! # }
//! ```

use crate::errors::ReconcileError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::core::ClusterResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// True if `meta` lists `finalizer`.
#[must_use]
pub fn contains_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Adds `finalizer` to `meta`. Returns true if it was missing.
pub fn add_finalizer_in_memory(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if contains_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Removes every occurrence of `finalizer` from `meta`. Returns true if any was
/// present.
pub fn remove_finalizer_in_memory(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    let removed = finalizers.len() != before;
    if finalizers.is_empty() {
        meta.finalizers = None;
    }
    removed
}

fn finalizer_patch(meta: &ObjectMeta, finalizers: &[String]) -> serde_json::Value {
    let mut patch = json!({ "metadata": { "finalizers": finalizers } });
    if let Some(rv) = &meta.resource_version {
        patch["metadata"]["resourceVersion"] = json!(rv);
    }
    patch
}

async fn patch_finalizers<T>(
    api: Api<T>,
    resource: &T,
    finalizers: &[String],
) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let name = resource.name_any();
    let patch = finalizer_patch(resource.meta(), finalizers);
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| ReconcileError::from_kube(e, &T::kind(&()), &name))?;
    Ok(())
}

/// Add a finalizer to a cluster-scoped resource if not already present.
///
/// # Errors
///
/// Returns the mapped Kubernetes error if the patch fails, including
/// [`ReconcileError::Conflict`] when the resource changed since it was read.
pub async fn ensure_cluster_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let mut meta = resource.meta().clone();
    if !add_finalizer_in_memory(&mut meta, finalizer) {
        return Ok(());
    }

    info!(kind = %T::kind(&()), name = %resource.name_any(), finalizer, "Adding finalizer");
    let finalizers = meta.finalizers.unwrap_or_default();
    patch_finalizers(Api::all(client.clone()), resource, &finalizers).await
}

/// Remove a finalizer from a cluster-scoped resource if present.
///
/// # Errors
///
/// Returns the mapped Kubernetes error if the patch fails.
pub async fn remove_cluster_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let mut meta = resource.meta().clone();
    if !remove_finalizer_in_memory(&mut meta, finalizer) {
        return Ok(());
    }

    info!(kind = %T::kind(&()), name = %resource.name_any(), finalizer, "Removing finalizer");
    let finalizers = meta.finalizers.unwrap_or_default();
    patch_finalizers(Api::all(client.clone()), resource, &finalizers).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
