// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic create/replace/delete helpers for namespaced Kubernetes resources, and
//! the [`SecretStore`] seam used by the credential and addon phases.
//!
//! # Strategies
//!
//! - **Replace**: create when missing, otherwise replace carrying the live
//!   `resourceVersion` so a concurrent writer yields a conflict
//! - **Delete**: delete, treating 404 as success
//!
//! # Example
//!
//! ```rust,no_run
//! use ako_operator::reconcilers::resources::create_or_replace;
//! use k8s_openapi::api::core::v1::Service;
//! use kube::Client;
//!
//! async fn example(client: &Client, svc: Service) -> Result<(), ako_operator::errors::ReconcileError> {
//!     create_or_replace(client, "default", &svc).await?;
//!     Ok(())
//! }
//! ```

use crate::errors::ReconcileError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Create or replace a namespaced resource.
///
/// # Errors
///
/// Returns [`ReconcileError::Validation`] if the resource has no name, or the mapped
/// Kubernetes error if an API call fails.
pub async fn create_or_replace<T>(
    client: &Client,
    namespace: &str,
    resource: &T,
) -> Result<(), ReconcileError>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>,
{
    let kind = T::kind(&()).to_string();
    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| ReconcileError::Validation {
            kind: kind.clone(),
            name: String::new(),
            reason: "resource must have a name".to_string(),
        })?;
    let id = format!("{namespace}/{name}");

    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let existing = api
        .get_opt(&name)
        .await
        .map_err(|e| ReconcileError::from_kube(e, &kind, &id))?;

    match existing {
        Some(live) => {
            let mut desired = resource.clone();
            desired.meta_mut().resource_version = live.resource_version();
            api.replace(&name, &PostParams::default(), &desired)
                .await
                .map_err(|e| ReconcileError::from_kube(e, &kind, &id))?;
            info!("Replaced {} {}", kind, id);
        }
        None => {
            api.create(&PostParams::default(), resource)
                .await
                .map_err(|e| ReconcileError::from_kube(e, &kind, &id))?;
            info!("Created {} {}", kind, id);
        }
    }

    Ok(())
}

/// Delete a namespaced resource. Returns false if it was already gone.
///
/// # Errors
///
/// Returns the mapped Kubernetes error for anything but 404.
pub async fn delete_if_exists<T>(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<bool, ReconcileError>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + for<'de> serde::Deserialize<'de>,
{
    let kind = T::kind(&()).to_string();
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted {} {}/{}", kind, namespace, name);
            Ok(true)
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            debug!("{} {}/{} already gone", kind, namespace, name);
            Ok(false)
        }
        Err(e) => Err(ReconcileError::from_kube(e, &kind, &format!("{namespace}/{name}"))),
    }
}

/// UTF-8 value of a secret key, looking at `data` then `stringData`.
#[must_use]
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

// ============================================================================
// Secret store
// ============================================================================

/// Secret access used by credential provisioning and the addon phases.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ReconcileError>;

    /// Creates or replaces the secret named by its metadata.
    async fn apply(&self, secret: &Secret) -> Result<(), ReconcileError>;

    /// Deletes the secret. Returns false if it was already gone.
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ReconcileError>;
}

/// [`SecretStore`] backed by the Kubernetes API.
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ReconcileError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| ReconcileError::from_kube(e, "Secret", &format!("{namespace}/{name}")))
    }

    async fn apply(&self, secret: &Secret) -> Result<(), ReconcileError> {
        let namespace = secret.namespace().unwrap_or_default();
        create_or_replace(&self.client, &namespace, secret).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ReconcileError> {
        delete_if_exists::<Secret>(&self.client, namespace, name).await
    }
}

/// In-memory [`SecretStore`] for tests and dry runs.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<(String, String), Secret>>,
    writes: Mutex<usize>,
}

impl InMemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a secret without counting it as a write.
    pub fn insert(&self, secret: Secret) {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, secret);
    }

    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of `apply` calls observed
    #[must_use]
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ReconcileError> {
        Ok(self.secret(namespace, name))
    }

    async fn apply(&self, secret: &Secret) -> Result<(), ReconcileError> {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.insert(secret.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ReconcileError> {
        Ok(self
            .secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
