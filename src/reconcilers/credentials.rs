// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-cluster Avi credential provisioning.
//!
//! Every cluster owned by an `AKODeploymentConfig` gets two secrets holding the
//! same three keys (`username`, `password`, `certificateAuthorityData`):
//!
//! - `<cluster>-avi-credentials` next to the cluster, read when rendering the
//!   addon values
//! - `<namespace>-<cluster>-avi-credentials` in the operator namespace
//!
//! When the configuration names a `workloadCredentialRef`, that secret is copied.
//! Otherwise an Avi user `<namespace>-<cluster>-ako-user` is ensured, bound to the
//! `ako-essential-role` whose privileges are kept in line with the baseline.
//! Generated passwords are stored in the cluster secret and reused, so repeated
//! reconciles never rotate them.

use crate::avi::{
    AviClient, AviClientFactory, AviConnection, AviCredentials, AviError, Role, User, UserAccess,
};
use crate::constants::{
    AKO_ROLE_NAME, CREDENTIAL_CA_KEY, CREDENTIAL_PASSWORD_KEY, CREDENTIAL_USERNAME_KEY,
    DEFAULT_CONTROLLER_VERSION, GENERATED_PASSWORD_LENGTH,
};
use crate::crd::{AKODeploymentConfig, Cluster, SecretRef};
use crate::errors::ReconcileError;
use crate::labels::CLUSTER_NAME_LABEL;
use crate::permissions::{baseline_role, sync_role};
use crate::reconcilers::resources::{secret_string, SecretStore};
use crate::reconcilers::retry::retry_avi_call;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#%^*-_+=";

/// Tenant used when the configuration does not name one
const DEFAULT_TENANT: &str = "admin";

/// `<cluster>-avi-credentials`, in the cluster's namespace.
#[must_use]
pub fn cluster_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-avi-credentials")
}

/// `<namespace>-<cluster>-avi-credentials`, in the operator namespace.
#[must_use]
pub fn management_secret_name(namespace: &str, cluster_name: &str) -> String {
    format!("{namespace}-{cluster_name}-avi-credentials")
}

/// `<namespace>-<cluster>-ako-user`
#[must_use]
pub fn ako_user_name(namespace: &str, cluster_name: &str) -> String {
    format!("{namespace}-{cluster_name}-ako-user")
}

/// Random password with at least one lowercase, uppercase, digit and symbol.
#[must_use]
pub fn generate_password() -> String {
    let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rand::random_range(0..class.len())])
        .collect();
    while chars.len() < GENERATED_PASSWORD_LENGTH {
        chars.push(all[rand::random_range(0..all.len())]);
    }
    for i in (1..chars.len()).rev() {
        chars.swap(i, rand::random_range(0..=i));
    }

    chars.into_iter().map(char::from).collect()
}

/// Secret carrying exactly the three credential keys.
#[must_use]
pub fn credentials_secret(
    name: &str,
    namespace: &str,
    cluster_name: &str,
    credentials: &AviCredentials,
    owner: Option<OwnerReference>,
) -> Secret {
    let data = BTreeMap::from([
        (
            CREDENTIAL_USERNAME_KEY.to_string(),
            ByteString(credentials.username.as_bytes().to_vec()),
        ),
        (
            CREDENTIAL_PASSWORD_KEY.to_string(),
            ByteString(credentials.password.as_bytes().to_vec()),
        ),
        (
            CREDENTIAL_CA_KEY.to_string(),
            ByteString(credentials.certificate_authority_data.as_bytes().to_vec()),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                cluster_name.to_string(),
            )])),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Reads the credential contract out of a secret.
///
/// `username` and `password` are required. A missing CA key yields an empty CA.
///
/// # Errors
///
/// Returns [`ReconcileError::Validation`] if a required key is missing.
pub fn credentials_from_secret(secret: &Secret) -> Result<AviCredentials, ReconcileError> {
    let id = format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    );
    let required = |key: &str| {
        secret_string(secret, key).ok_or_else(|| ReconcileError::Validation {
            kind: "Secret".to_string(),
            name: id.clone(),
            reason: format!("missing key '{key}'"),
        })
    };

    Ok(AviCredentials {
        username: required(CREDENTIAL_USERNAME_KEY)?,
        password: required(CREDENTIAL_PASSWORD_KEY)?,
        certificate_authority_data: secret_string(secret, CREDENTIAL_CA_KEY).unwrap_or_default(),
    })
}

fn cluster_owner(cluster: &Cluster) -> Option<OwnerReference> {
    cluster.meta().uid.as_ref().map(|uid| OwnerReference {
        api_version: Cluster::api_version(&()).to_string(),
        kind: Cluster::kind(&()).to_string(),
        name: cluster.name_any(),
        uid: uid.clone(),
        controller: None,
        block_owner_deletion: None,
    })
}

fn same_data(existing: Option<&Secret>, desired: &Secret) -> bool {
    existing.is_some_and(|s| s.data == desired.data)
}

fn tenant_name(config: &AKODeploymentConfig) -> String {
    config
        .spec
        .tenant
        .as_ref()
        .map(|t| t.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_TENANT.to_string())
}

fn role_ref(role: &Role) -> String {
    match &role.uuid {
        Some(uuid) => format!("/api/role/{uuid}"),
        None => format!("/api/role/?name={}", role.name),
    }
}

/// Provisions and removes per-cluster Avi credentials.
pub struct CredentialProvisioner {
    secrets: Arc<dyn SecretStore>,
    avi: Arc<dyn AviClientFactory>,
    operator_namespace: String,
}

impl CredentialProvisioner {
    #[must_use]
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        avi: Arc<dyn AviClientFactory>,
        operator_namespace: &str,
    ) -> Self {
        Self {
            secrets,
            avi,
            operator_namespace: operator_namespace.to_string(),
        }
    }

    async fn required_secret(&self, reference: &SecretRef) -> Result<Secret, ReconcileError> {
        self.secrets
            .get(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| {
                ReconcileError::pending(
                    "Secret",
                    &format!("{}/{}", reference.namespace, reference.name),
                )
            })
    }

    /// Connection details for the configuration's Avi controller, built from the
    /// admin credential and CA secrets.
    ///
    /// # Errors
    ///
    /// Returns a retryable `NotFound` when a referenced secret is missing, or a
    /// `Validation` error when it lacks required keys.
    pub async fn admin_connection(
        &self,
        config: &AKODeploymentConfig,
    ) -> Result<AviConnection, ReconcileError> {
        let admin = credentials_from_secret(
            &self.required_secret(&config.spec.admin_credential_ref).await?,
        )?;
        let ca_secret = self
            .required_secret(&config.spec.certificate_authority_ref)
            .await?;

        Ok(AviConnection {
            controller: config.spec.controller.clone(),
            username: admin.username,
            password: admin.password,
            ca_data: secret_string(&ca_secret, CREDENTIAL_CA_KEY).unwrap_or_default(),
            version: config
                .spec
                .controller_version
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTROLLER_VERSION.to_string()),
            tenant: tenant_name(config),
        })
    }

    /// Opens an admin session against the configuration's controller.
    ///
    /// # Errors
    ///
    /// See [`Self::admin_connection`]; connection failures surface as
    /// [`ReconcileError::Avi`].
    pub async fn connect(
        &self,
        config: &AKODeploymentConfig,
    ) -> Result<Arc<dyn AviClient>, ReconcileError> {
        let connection = self.admin_connection(config).await?;
        Ok(self.avi.connect(&connection).await?)
    }

    /// Credentials currently stored next to `cluster`, if any.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `Validation` if the secret is malformed.
    pub async fn current(
        &self,
        cluster: &Cluster,
    ) -> Result<Option<AviCredentials>, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        self.secrets
            .get(&namespace, &cluster_secret_name(&cluster.name_any()))
            .await?
            .map(|s| credentials_from_secret(&s))
            .transpose()
    }

    /// Ensures both credential secrets exist for `cluster` and returns their
    /// content.
    ///
    /// # Errors
    ///
    /// Missing reference secrets, Avi failures, and secret store failures.
    pub async fn provision(
        &self,
        cluster: &Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<AviCredentials, ReconcileError> {
        let credentials = match &config.spec.workload_credential_ref {
            Some(reference) => self.copy_workload_credentials(reference, config).await?,
            None => self.ensure_avi_user(cluster, config).await?,
        };
        self.write_secrets(cluster, &credentials).await?;
        Ok(credentials)
    }

    async fn copy_workload_credentials(
        &self,
        reference: &SecretRef,
        config: &AKODeploymentConfig,
    ) -> Result<AviCredentials, ReconcileError> {
        let mut credentials = credentials_from_secret(&self.required_secret(reference).await?)?;
        if credentials.certificate_authority_data.is_empty() {
            let ca_secret = self
                .required_secret(&config.spec.certificate_authority_ref)
                .await?;
            credentials.certificate_authority_data =
                secret_string(&ca_secret, CREDENTIAL_CA_KEY).unwrap_or_default();
        }
        Ok(credentials)
    }

    async fn ensure_avi_user(
        &self,
        cluster: &Cluster,
        config: &AKODeploymentConfig,
    ) -> Result<AviCredentials, ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let username = ako_user_name(&namespace, &cluster.name_any());

        // A malformed secret is replaced rather than blocking provisioning.
        let stored = match self.current(cluster).await {
            Ok(stored) => stored,
            Err(e @ ReconcileError::Validation { .. }) => {
                warn!(
                    cluster = %format!("{namespace}/{}", cluster.name_any()),
                    error = %e,
                    "Replacing malformed credential secret"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let connection = self.admin_connection(config).await?;
        let client = self.avi.connect(&connection).await?;

        let known_password = stored
            .filter(|c| c.username == username)
            .map(|c| c.password);
        let password_is_new = known_password.is_none();
        let password = known_password.unwrap_or_else(generate_password);

        let role = ensure_role(client.as_ref()).await?;
        let tenant = format!("/api/tenant/?name={}", connection.tenant);
        let desired = User {
            uuid: None,
            name: username.clone(),
            username: username.clone(),
            password: Some(password.clone()),
            access: vec![UserAccess {
                role_ref: role_ref(&role),
                tenant_ref: Some(tenant.clone()),
                all_tenants: false,
            }],
            default_tenant_ref: Some(tenant),
        };
        ensure_user(client.as_ref(), desired, password_is_new).await?;

        Ok(AviCredentials {
            username,
            password,
            certificate_authority_data: connection.ca_data,
        })
    }

    async fn write_secrets(
        &self,
        cluster: &Cluster,
        credentials: &AviCredentials,
    ) -> Result<(), ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        let desired = [
            credentials_secret(
                &cluster_secret_name(&cluster_name),
                &namespace,
                &cluster_name,
                credentials,
                cluster_owner(cluster),
            ),
            credentials_secret(
                &management_secret_name(&namespace, &cluster_name),
                &self.operator_namespace,
                &cluster_name,
                credentials,
                None,
            ),
        ];

        for secret in &desired {
            let ns = secret.namespace().unwrap_or_default();
            let name = secret.name_any();
            let existing = self.secrets.get(&ns, &name).await?;
            if same_data(existing.as_ref(), secret) {
                debug!(secret = %format!("{ns}/{name}"), "Credential secret up to date");
                continue;
            }
            info!(
                secret = %format!("{ns}/{name}"),
                cluster = %cluster_name,
                "Writing Avi credential secret"
            );
            self.secrets.apply(secret).await?;
        }
        Ok(())
    }

    /// Deletes both credential secrets. The Avi user is left in place.
    ///
    /// # Errors
    ///
    /// Secret store failures other than a missing secret.
    pub async fn remove(&self, cluster: &Cluster) -> Result<(), ReconcileError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        self.secrets
            .delete(&namespace, &cluster_secret_name(&cluster_name))
            .await?;
        self.secrets
            .delete(
                &self.operator_namespace,
                &management_secret_name(&namespace, &cluster_name),
            )
            .await?;
        info!(cluster = %format!("{namespace}/{cluster_name}"), "Removed Avi credential secrets");
        Ok(())
    }
}

/// Fetches the AKO role, creating it with the baseline when missing and pushing
/// it back only when its privileges drifted.
///
/// # Errors
///
/// Avi failures other than a missing role.
pub async fn ensure_role(client: &dyn AviClient) -> Result<Role, ReconcileError> {
    match retry_avi_call(|| client.role_get_by_name(AKO_ROLE_NAME), "get AKO role").await {
        Ok(mut role) => {
            if sync_role(&mut role) {
                info!(role = AKO_ROLE_NAME, "Updating AKO role privileges");
                let updated =
                    retry_avi_call(|| client.role_update(&role), "update AKO role").await?;
                return Ok(updated);
            }
            debug!(role = AKO_ROLE_NAME, "AKO role privileges up to date");
            Ok(role)
        }
        Err(AviError::NotFound { .. }) => {
            info!(role = AKO_ROLE_NAME, "Creating AKO role");
            let role = baseline_role(AKO_ROLE_NAME);
            Ok(retry_avi_call(|| client.role_create(&role), "create AKO role").await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates the user, or updates it when its password must be reset or its
/// access binding drifted.
async fn ensure_user(
    client: &dyn AviClient,
    desired: User,
    password_is_new: bool,
) -> Result<User, ReconcileError> {
    let name = desired.name.clone();
    match retry_avi_call(|| client.user_get_by_name(&name), "get AKO user").await {
        Ok(existing) => {
            if !password_is_new && existing.access == desired.access {
                debug!(user = %name, "AKO user up to date");
                return Ok(existing);
            }
            info!(user = %name, reset_password = password_is_new, "Updating AKO user");
            let user = User {
                uuid: existing.uuid,
                ..desired
            };
            Ok(retry_avi_call(|| client.user_update(&user), "update AKO user").await?)
        }
        Err(AviError::NotFound { .. }) => {
            info!(user = %name, "Creating AKO user");
            Ok(retry_avi_call(|| client.user_create(&desired), "create AKO user").await?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod credentials_tests;
