// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process-wide operator settings.
//!
//! Every flag falls back to an environment variable so the operator can be
//! configured from its Deployment manifest without arguments.

use crate::constants::{
    DEFAULT_CONTROL_PLANE_ENDPOINT_PORT, DEFAULT_METRICS_ADDR, DEFAULT_OPERATOR_NAMESPACE,
};
use clap::Parser;

/// Settings read once at startup.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "ako-operator", version, about = "Avi load balancer operator for Cluster API clusters")]
pub struct OperatorSettings {
    /// Serve control-plane endpoints through Avi virtual services
    #[arg(long, env = "AVI_CONTROL_PLANE_HA_PROVIDER", default_value_t = false, action = clap::ArgAction::Set)]
    pub control_plane_ha_provider: bool,

    /// Running in a short-lived bootstrap cluster
    #[arg(long, env = "BOOTSTRAP_CLUSTER", default_value_t = false, action = clap::ArgAction::Set)]
    pub bootstrap_cluster: bool,

    /// Port exposed by the control-plane HA service
    #[arg(long, env = "AVI_CONTROL_PLANE_ENDPOINT_PORT", default_value_t = DEFAULT_CONTROL_PLANE_ENDPOINT_PORT)]
    pub control_plane_endpoint_port: i32,

    /// Namespace the operator runs in; operator-side credential copies live here
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    pub operator_namespace: String,

    /// Listen address for `/metrics` and `/healthz`
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    pub metrics_addr: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            control_plane_ha_provider: false,
            bootstrap_cluster: false,
            control_plane_endpoint_port: DEFAULT_CONTROL_PLANE_ENDPOINT_PORT,
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

impl OperatorSettings {
    /// Rejects settings the operator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a message when the endpoint port is outside 1..=65535 or the
    /// operator namespace is empty.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=65535).contains(&self.control_plane_endpoint_port) {
            return Err(format!(
                "control plane endpoint port {} is out of range",
                self.control_plane_endpoint_port
            ));
        }
        if self.operator_namespace.trim().is_empty() {
            return Err("operator namespace must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod settings_tests;
