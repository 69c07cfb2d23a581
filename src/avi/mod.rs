// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Avi controller capability interface.
//!
//! The operator only needs a narrow slice of the Avi REST API: name lookups for
//! clouds, service engine groups, and networks (admission checks), plus role and
//! user management (credential provisioning). [`AviClient`] models that slice so
//! reconcilers and validators can run against [`fake::FakeAviClient`] in tests and
//! [`client::HttpAviClient`] in production.

pub mod client;
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when talking to the Avi controller
#[derive(Debug, Error)]
pub enum AviError {
    /// Connection-level failure (DNS, TCP, TLS)
    #[error("Avi transport error: {0}")]
    Transport(String),

    /// Request exceeded its deadline
    #[error("Avi request timed out: {0}")]
    Timeout(String),

    /// Avi returned a non-success status
    #[error("Avi API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// Credentials were rejected
    #[error("Avi authentication failed: {0}")]
    Authentication(String),

    /// Lookup by name returned nothing
    #[error("Avi {kind} '{name}' not found")]
    NotFound {
        /// Avi object type, e.g. `cloud`
        kind: String,
        /// Name that was looked up
        name: String,
    },

    /// Response body did not match the expected model
    #[error("Failed to decode Avi response: {0}")]
    Decode(String),

    /// Request could not be built (bad controller address, bad CA)
    #[error("Invalid Avi request: {0}")]
    InvalidRequest(String),
}

impl AviError {
    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::NotFound { .. } => true,
            Self::Api { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Authentication(_) | Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Returns true for failures worth retrying in place (connection, timeout,
    /// throttling, server errors). Unlike [`Self::is_retryable`], a missing object
    /// is not transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    #[must_use]
    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<reqwest::Error> for AviError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

// ============================================================================
// Models
// ============================================================================

/// Avi cloud
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    /// IPAM profile reference; AKO requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam_provider_ref: Option<String>,
}

/// Avi service engine group
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEngineGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
}

/// Avi network
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
}

/// One privilege entry of a role: a resource key and the access granted on it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    #[serde(rename = "type")]
    pub permission_type: String,
}

impl Permission {
    #[must_use]
    pub fn new(resource: &str, permission_type: &str) -> Self {
        Self {
            resource: resource.to_string(),
            permission_type: permission_type.to_string(),
        }
    }
}

/// Avi access-control role
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub privileges: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_ref: Option<String>,
}

/// Role/tenant binding on an Avi user
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAccess {
    pub role_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_ref: Option<String>,
    #[serde(default)]
    pub all_tenants: bool,
}

/// Avi local user
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    pub username: String,
    /// Only sent on create/update; never returned by Avi
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub access: Vec<UserAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tenant_ref: Option<String>,
}

/// The three fields of the credential secret contract.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AviCredentials {
    pub username: String,
    pub password: String,
    /// PEM bundle of the controller CA
    pub certificate_authority_data: String,
}

impl std::fmt::Debug for AviCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AviCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Capability Interface
// ============================================================================

/// Operations the operator performs against the Avi controller.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait]
pub trait AviClient: Send + Sync {
    /// Controller address this client talks to
    fn controller(&self) -> &str;

    async fn cloud_get_by_name(&self, name: &str) -> Result<Cloud, AviError>;
    async fn service_engine_group_get_by_name(
        &self,
        name: &str,
        cloud_name: &str,
    ) -> Result<ServiceEngineGroup, AviError>;
    async fn network_get_by_name(&self, name: &str, cloud_name: &str) -> Result<Network, AviError>;

    async fn role_get_by_name(&self, name: &str) -> Result<Role, AviError>;
    async fn role_create(&self, role: &Role) -> Result<Role, AviError>;
    async fn role_update(&self, role: &Role) -> Result<Role, AviError>;

    async fn user_get_by_name(&self, name: &str) -> Result<User, AviError>;
    async fn user_create(&self, user: &User) -> Result<User, AviError>;
    /// Replaces an existing user, e.g. to rotate its password
    async fn user_update(&self, user: &User) -> Result<User, AviError>;
}

/// Everything needed to open a session against one Avi controller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AviConnection {
    /// `[scheme://]host[:port]`
    pub controller: String,
    pub username: String,
    pub password: String,
    /// PEM CA bundle; empty trusts the system roots
    pub ca_data: String,
    pub version: String,
    pub tenant: String,
}

/// Builds [`AviClient`]s for the controllers named by `AKODeploymentConfig`s.
#[async_trait]
pub trait AviClientFactory: Send + Sync {
    async fn connect(&self, connection: &AviConnection) -> Result<Arc<dyn AviClient>, AviError>;
}
