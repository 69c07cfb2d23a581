// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP implementation of [`AviClient`] on top of `reqwest`.

use super::{
    AviClient, AviClientFactory, AviConnection, AviError, Cloud, Network, Role,
    ServiceEngineGroup, User,
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Avi list responses wrap objects in `{"count": n, "results": [...]}`
#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// Avi REST client authenticating with basic auth on every request.
pub struct HttpAviClient {
    client: reqwest::Client,
    base_url: Url,
    connection: AviConnection,
}

impl HttpAviClient {
    /// Builds a client for one controller.
    ///
    /// # Errors
    ///
    /// Returns [`AviError::InvalidRequest`] if the controller address or CA bundle is
    /// malformed, or [`AviError::Transport`] if the TLS stack cannot be initialized.
    pub fn new(connection: AviConnection, timeout: Duration) -> Result<Self, AviError> {
        let base_url = controller_base_url(&connection.controller)?;

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !connection.ca_data.trim().is_empty() {
            let cert = reqwest::Certificate::from_pem(connection.ca_data.as_bytes())
                .map_err(|e| AviError::InvalidRequest(format!("invalid controller CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url,
            connection,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AviError> {
        self.base_url
            .join(&format!("api/{path}"))
            .map_err(|e| AviError::InvalidRequest(format!("invalid API path '{path}': {e}")))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .basic_auth(&self.connection.username, Some(&self.connection.password))
            .header("Accept", "application/json");
        if !self.connection.version.is_empty() {
            builder = builder.header("X-Avi-Version", &self.connection.version);
        }
        if !self.connection.tenant.is_empty() {
            builder = builder.header("X-Avi-Tenant", &self.connection.tenant);
        }
        builder
    }

    async fn get_by_name<T: DeserializeOwned>(
        &self,
        kind: &str,
        name: &str,
        filters: &[(&str, &str)],
    ) -> Result<T, AviError> {
        let mut url = self.endpoint(kind)?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .extend_pairs(filters);

        debug!(kind = kind, name = name, "Looking up Avi object by name");
        let response = self.request(Method::GET, url).send().await?;
        let list: ListResponse<T> = decode(response).await?;
        list.results
            .into_iter()
            .next()
            .ok_or_else(|| AviError::not_found(kind, name))
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, AviError> {
        let url = self.endpoint(path)?;
        debug!(method = %method, path = path, "Sending Avi request");
        let response = self.request(method, url).json(body).send().await?;
        decode(response).await
    }
}

/// Normalizes `[scheme://]host[:port]` into a base URL ending in `/`.
///
/// # Errors
///
/// Returns [`AviError::InvalidRequest`] when the address cannot be parsed.
pub fn controller_base_url(controller: &str) -> Result<Url, AviError> {
    let trimmed = controller.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AviError::InvalidRequest(
            "controller address is empty".to_string(),
        ));
    }
    let with_scheme = if trimmed.contains("://") {
        format!("{trimmed}/")
    } else {
        format!("https://{trimmed}/")
    };
    Url::parse(&with_scheme).map_err(|e| {
        AviError::InvalidRequest(format!("invalid controller address '{controller}': {e}"))
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AviError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(AviError::Authentication(format!("{status}: {body}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AviError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        AviError::Decode(format!(
            "{e} - response (first 200 chars): {}",
            text.chars().take(200).collect::<String>()
        ))
    })
}

#[async_trait]
impl AviClient for HttpAviClient {
    fn controller(&self) -> &str {
        &self.connection.controller
    }

    async fn cloud_get_by_name(&self, name: &str) -> Result<Cloud, AviError> {
        self.get_by_name("cloud", name, &[]).await
    }

    async fn service_engine_group_get_by_name(
        &self,
        name: &str,
        cloud_name: &str,
    ) -> Result<ServiceEngineGroup, AviError> {
        self.get_by_name("serviceenginegroup", name, &[("cloud_ref.name", cloud_name)])
            .await
    }

    async fn network_get_by_name(&self, name: &str, cloud_name: &str) -> Result<Network, AviError> {
        self.get_by_name("network", name, &[("cloud_ref.name", cloud_name)])
            .await
    }

    async fn role_get_by_name(&self, name: &str) -> Result<Role, AviError> {
        self.get_by_name("role", name, &[]).await
    }

    async fn role_create(&self, role: &Role) -> Result<Role, AviError> {
        self.send_json(Method::POST, "role", role).await
    }

    async fn role_update(&self, role: &Role) -> Result<Role, AviError> {
        let uuid = role.uuid.as_deref().ok_or_else(|| {
            AviError::InvalidRequest(format!("role '{}' has no uuid", role.name))
        })?;
        self.send_json(Method::PUT, &format!("role/{uuid}"), role)
            .await
    }

    async fn user_get_by_name(&self, name: &str) -> Result<User, AviError> {
        self.get_by_name("user", name, &[]).await
    }

    async fn user_create(&self, user: &User) -> Result<User, AviError> {
        self.send_json(Method::POST, "user", user).await
    }

    async fn user_update(&self, user: &User) -> Result<User, AviError> {
        let uuid = user.uuid.as_deref().ok_or_else(|| {
            AviError::InvalidRequest(format!("user '{}' has no uuid", user.name))
        })?;
        self.send_json(Method::PUT, &format!("user/{uuid}"), user)
            .await
    }
}

/// Production factory: one [`HttpAviClient`] per connection.
pub struct HttpAviClientFactory {
    timeout: Duration,
}

impl HttpAviClientFactory {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AviClientFactory for HttpAviClientFactory {
    async fn connect(&self, connection: &AviConnection) -> Result<Arc<dyn AviClient>, AviError> {
        let client = HttpAviClient::new(connection.clone(), self.timeout)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
