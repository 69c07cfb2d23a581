// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic in-memory [`AviClient`] for tests.
//!
//! Objects live in shared maps keyed by name, so a clone of the fake observes every
//! write made through another clone.

use super::{
    AviClient, AviClientFactory, AviConnection, AviError, Cloud, Network, Role,
    ServiceEngineGroup, User,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory Avi controller
#[derive(Clone, Default)]
pub struct FakeAviClient {
    clouds: Arc<Mutex<HashMap<String, Cloud>>>,
    service_engine_groups: Arc<Mutex<HashMap<String, ServiceEngineGroup>>>,
    networks: Arc<Mutex<HashMap<String, Network>>>,
    roles: Arc<Mutex<HashMap<String, Role>>>,
    users: Arc<Mutex<HashMap<String, User>>>,
    role_updates: Arc<Mutex<usize>>,
    next_id: Arc<Mutex<u64>>,
    unreachable: Arc<Mutex<bool>>,
}

impl FakeAviClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cloud with an IPAM profile.
    pub fn add_cloud(&self, name: &str) {
        self.add_cloud_with_ipam(name, Some("ipam-profile"));
    }

    pub fn add_cloud_with_ipam(&self, name: &str, ipam: Option<&str>) {
        lock(&self.clouds).insert(
            name.to_string(),
            Cloud {
                uuid: Some(format!("cloud-{name}")),
                name: name.to_string(),
                ipam_provider_ref: ipam.map(str::to_string),
            },
        );
    }

    pub fn add_service_engine_group(&self, name: &str) {
        lock(&self.service_engine_groups).insert(
            name.to_string(),
            ServiceEngineGroup {
                uuid: Some(format!("seg-{name}")),
                name: name.to_string(),
            },
        );
    }

    pub fn add_network(&self, name: &str) {
        lock(&self.networks).insert(
            name.to_string(),
            Network {
                uuid: Some(format!("net-{name}")),
                name: name.to_string(),
            },
        );
    }

    /// Stores a role as-is (assigning a uuid if missing).
    pub fn put_role(&self, mut role: Role) {
        if role.uuid.is_none() {
            role.uuid = Some(self.next_uuid("role"));
        }
        lock(&self.roles).insert(role.name.clone(), role);
    }

    #[must_use]
    pub fn role(&self, name: &str) -> Option<Role> {
        lock(&self.roles).get(name).cloned()
    }

    #[must_use]
    pub fn user(&self, name: &str) -> Option<User> {
        lock(&self.users).get(name).cloned()
    }

    /// Number of `role_update` calls observed
    #[must_use]
    pub fn role_update_count(&self) -> usize {
        *lock(&self.role_updates)
    }

    /// Makes every call fail with a transport error until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        *lock(&self.unreachable) = unreachable;
    }

    fn check_reachable(&self) -> Result<(), AviError> {
        if *lock(&self.unreachable) {
            return Err(AviError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn next_uuid(&self, prefix: &str) -> String {
        let mut id = lock(&self.next_id);
        *id += 1;
        format!("{prefix}-{id}")
    }
}

#[async_trait]
impl AviClient for FakeAviClient {
    fn controller(&self) -> &str {
        "fake-avi-controller"
    }

    async fn cloud_get_by_name(&self, name: &str) -> Result<Cloud, AviError> {
        self.check_reachable()?;
        lock(&self.clouds)
            .get(name)
            .cloned()
            .ok_or_else(|| AviError::not_found("cloud", name))
    }

    async fn service_engine_group_get_by_name(
        &self,
        name: &str,
        _cloud_name: &str,
    ) -> Result<ServiceEngineGroup, AviError> {
        self.check_reachable()?;
        lock(&self.service_engine_groups)
            .get(name)
            .cloned()
            .ok_or_else(|| AviError::not_found("serviceenginegroup", name))
    }

    async fn network_get_by_name(
        &self,
        name: &str,
        _cloud_name: &str,
    ) -> Result<Network, AviError> {
        self.check_reachable()?;
        lock(&self.networks)
            .get(name)
            .cloned()
            .ok_or_else(|| AviError::not_found("network", name))
    }

    async fn role_get_by_name(&self, name: &str) -> Result<Role, AviError> {
        self.check_reachable()?;
        lock(&self.roles)
            .get(name)
            .cloned()
            .ok_or_else(|| AviError::not_found("role", name))
    }

    async fn role_create(&self, role: &Role) -> Result<Role, AviError> {
        self.check_reachable()?;
        let mut created = role.clone();
        created.uuid = Some(self.next_uuid("role"));
        lock(&self.roles).insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn role_update(&self, role: &Role) -> Result<Role, AviError> {
        self.check_reachable()?;
        let mut roles = lock(&self.roles);
        if !roles.contains_key(&role.name) {
            return Err(AviError::not_found("role", &role.name));
        }
        roles.insert(role.name.clone(), role.clone());
        *lock(&self.role_updates) += 1;
        Ok(role.clone())
    }

    async fn user_get_by_name(&self, name: &str) -> Result<User, AviError> {
        self.check_reachable()?;
        lock(&self.users)
            .get(name)
            .cloned()
            .ok_or_else(|| AviError::not_found("user", name))
    }

    async fn user_create(&self, user: &User) -> Result<User, AviError> {
        self.check_reachable()?;
        let mut created = user.clone();
        created.uuid = Some(self.next_uuid("user"));
        lock(&self.users).insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn user_update(&self, user: &User) -> Result<User, AviError> {
        self.check_reachable()?;
        let mut users = lock(&self.users);
        if !users.contains_key(&user.name) {
            return Err(AviError::not_found("user", &user.name));
        }
        users.insert(user.name.clone(), user.clone());
        Ok(user.clone())
    }
}

/// Factory handing out one shared [`FakeAviClient`] regardless of connection.
#[derive(Clone, Default)]
pub struct FakeAviClientFactory {
    pub client: FakeAviClient,
    connections: Arc<Mutex<Vec<AviConnection>>>,
}

impl FakeAviClientFactory {
    #[must_use]
    pub fn new(client: FakeAviClient) -> Self {
        Self {
            client,
            connections: Arc::default(),
        }
    }

    /// Connections requested so far, in order
    #[must_use]
    pub fn connections(&self) -> Vec<AviConnection> {
        lock(&self.connections).clone()
    }
}

#[async_trait]
impl AviClientFactory for FakeAviClientFactory {
    async fn connect(&self, connection: &AviConnection) -> Result<Arc<dyn AviClient>, AviError> {
        lock(&self.connections).push(connection.clone());
        Ok(Arc::new(self.client.clone()))
    }
}
