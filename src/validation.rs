// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admission checks for `AKODeploymentConfig`.
//!
//! [`validate_spec`] holds the pure checks (selector rules, CIDR and IP pool
//! syntax, immutability on update). [`validate_avi_references`] confirms that the
//! cloud, service engine group, and networks exist on the Avi controller. Both
//! accumulate every problem instead of stopping at the first one.

use crate::avi::AviClient;
use crate::constants::DEFAULT_ADC_NAME;
use crate::crd::{AKODeploymentConfig, ControlPlaneNetwork, DataNetwork, LabelSelector};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use std::net::IpAddr;
use thiserror::Error;

/// One invalid field, in the shape of a Kubernetes `field.Invalid` cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: Invalid value: {value:?}: {message}")]
pub struct FieldError {
    /// JSON path of the field, e.g. `spec.dataNetwork.cidr`
    pub path: String,
    /// Offending value, rendered as text
    pub value: String,
    pub message: String,
}

impl FieldError {
    fn invalid(
        path: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Joins errors into one line for status conditions and logs.
#[must_use]
pub fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn selector_text(selector: &LabelSelector) -> String {
    serde_json::to_string(selector).unwrap_or_default()
}

/// Parses `a.b.c.d/n` or an IPv6 CIDR. Host bits may be set.
///
/// # Errors
///
/// Returns the parser's message when `cidr` is not a CIDR.
pub fn parse_cidr(cidr: &str) -> Result<IpNetwork, String> {
    if !cidr.contains('/') {
        return Err(format!("invalid CIDR address: {cidr}"));
    }
    cidr.parse::<IpNetwork>().map_err(|e| e.to_string())
}

/// Selector immutability, operator syntax, and the non-empty rule for
/// non-default configurations.
#[must_use]
pub fn validate_cluster_selector(
    config: &AKODeploymentConfig,
    old: Option<&AKODeploymentConfig>,
) -> Vec<FieldError> {
    const PATH: &str = "spec.clusterSelector";
    let selector = config.spec.selector();

    if let Some(old) = old {
        if old.spec.selector() != selector {
            return vec![FieldError::invalid(
                PATH,
                selector_text(&selector),
                "field should not be changed",
            )];
        }
    }

    let mut errors = Vec::new();
    for (i, req) in selector.match_expressions.iter().flatten().enumerate() {
        let path = format!("{PATH}.matchExpressions[{i}]");
        let has_values = req.values.as_ref().is_some_and(|v| !v.is_empty());
        match req.operator.as_str() {
            "In" | "NotIn" if !has_values => errors.push(FieldError::invalid(
                format!("{path}.values"),
                "",
                format!("values must be non-empty for operator {}", req.operator),
            )),
            "Exists" | "DoesNotExist" if has_values => errors.push(FieldError::invalid(
                format!("{path}.values"),
                req.values.clone().unwrap_or_default().join(","),
                format!("values must be empty for operator {}", req.operator),
            )),
            "In" | "NotIn" | "Exists" | "DoesNotExist" => {}
            other => errors.push(FieldError::invalid(
                format!("{path}.operator"),
                other,
                "not a valid selector operator",
            )),
        }
    }

    if config.name_any() != DEFAULT_ADC_NAME && selector.is_empty() {
        errors.push(FieldError::invalid(
            PATH,
            selector_text(&selector),
            "field should not be empty for non-default AKODeploymentConfig",
        ));
    }
    errors
}

/// CIDR and IP pool syntax of the data network.
///
/// A pool end outside the CIDR and a pool whose start exceeds its end are
/// reported independently.
#[must_use]
pub fn validate_data_network_addresses(network: &DataNetwork) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let cidr = match parse_cidr(&network.cidr) {
        Ok(cidr) => Some(cidr),
        Err(e) => {
            errors.push(FieldError::invalid(
                "spec.dataNetwork.cidr",
                &network.cidr,
                format!("data plane network cidr {} is not valid: {e}", network.cidr),
            ));
            None
        }
    };

    for (i, pool) in network.ip_pools.iter().enumerate() {
        let path = format!("spec.dataNetwork.ipPools[{i}]");
        let start = pool.start.parse::<IpAddr>().ok();
        let end = pool.end.parse::<IpAddr>().ok();

        if start.is_none() {
            errors.push(FieldError::invalid(
                format!("{path}.start"),
                &pool.start,
                format!("ip pool address {} is not valid", pool.start),
            ));
        }
        if end.is_none() {
            errors.push(FieldError::invalid(
                format!("{path}.end"),
                &pool.end,
                format!("ip pool address {} is not valid", pool.end),
            ));
        }

        if let Some(cidr) = cidr {
            let inside = |ip: Option<IpAddr>| ip.is_some_and(|ip| cidr.contains(ip));
            if !inside(start) || !inside(end) {
                errors.push(FieldError::invalid(
                    &path,
                    format!("{}-{}", pool.start, pool.end),
                    format!("Range [{},{}] is not in cidr {}", pool.start, pool.end, network.cidr),
                ));
            }
        }

        if let (Some(start), Some(end)) = (start, end) {
            if to_comparable(start) > to_comparable(end) {
                errors.push(FieldError::invalid(
                    &path,
                    format!("{}-{}", pool.start, pool.end),
                    format!("{} is greater than {}", pool.start, pool.end),
                ));
            }
        }
    }
    errors
}

fn to_comparable(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// CIDR syntax of the control-plane network.
#[must_use]
pub fn validate_control_plane_network(network: &ControlPlaneNetwork) -> Option<FieldError> {
    parse_cidr(&network.cidr).err().map(|e| {
        FieldError::invalid(
            "spec.controlPlaneNetwork.cidr",
            &network.cidr,
            format!("control plane network cidr {} is not valid: {e}", network.cidr),
        )
    })
}

/// The control-plane network cannot change once endpoints were allocated from it.
#[must_use]
pub fn validate_immutable_networks(
    config: &AKODeploymentConfig,
    old: &AKODeploymentConfig,
) -> Vec<FieldError> {
    let new_cp = config.spec.control_plane_network.clone().unwrap_or_default();
    let old_cp = old.spec.control_plane_network.clone().unwrap_or_default();
    if new_cp.name != old_cp.name || new_cp.cidr != old_cp.cidr {
        return vec![FieldError::invalid(
            "spec.controlPlaneNetwork",
            format!("{}/{}", new_cp.name, new_cp.cidr),
            "field should not be changed",
        )];
    }
    Vec::new()
}

/// Every check that does not need the Avi controller.
///
/// `old` is the stored object on update and `None` on create.
#[must_use]
pub fn validate_spec(
    config: &AKODeploymentConfig,
    old: Option<&AKODeploymentConfig>,
) -> Vec<FieldError> {
    let mut errors = validate_cluster_selector(config, old);
    errors.extend(validate_data_network_addresses(&config.spec.data_network));
    if let Some(cp) = &config.spec.control_plane_network {
        errors.extend(validate_control_plane_network(cp));
    }
    if let Some(old) = old {
        errors.extend(validate_immutable_networks(config, old));
    }
    errors
}

/// Existence checks against the Avi controller.
///
/// On create every reference is checked; on update only references that changed.
pub async fn validate_avi_references(
    client: &dyn AviClient,
    config: &AKODeploymentConfig,
    old: Option<&AKODeploymentConfig>,
) -> Vec<FieldError> {
    let spec = &config.spec;
    let mut errors = Vec::new();

    let cloud_changed = old.is_none_or(|o| o.spec.cloud_name != spec.cloud_name);
    if cloud_changed {
        match client.cloud_get_by_name(&spec.cloud_name).await {
            Ok(cloud) if cloud.ipam_provider_ref.is_none() => errors.push(FieldError::invalid(
                "spec.cloudName",
                &spec.cloud_name,
                "this cloud doesn't have any ipam profile configured",
            )),
            Ok(_) => {}
            Err(e) => errors.push(FieldError::invalid(
                "spec.cloudName",
                &spec.cloud_name,
                format!("failed to get cloud from avi controller: {e}"),
            )),
        }
    }

    let seg_changed = old.is_none_or(|o| o.spec.service_engine_group != spec.service_engine_group);
    if seg_changed {
        if let Err(e) = client
            .service_engine_group_get_by_name(&spec.service_engine_group, &spec.cloud_name)
            .await
        {
            errors.push(FieldError::invalid(
                "spec.serviceEngineGroup",
                &spec.service_engine_group,
                format!("failed to get service engine group from avi controller: {e}"),
            ));
        }
    }

    if old.is_none() {
        if let Some(cp) = &spec.control_plane_network {
            if let Err(e) = client.network_get_by_name(&cp.name, &spec.cloud_name).await {
                errors.push(FieldError::invalid(
                    "spec.controlPlaneNetwork.name",
                    &cp.name,
                    format!("failed to get control plane network {} from avi controller: {e}", cp.name),
                ));
            }
        }
    }

    let data_changed = old.is_none_or(|o| {
        o.spec.data_network.name != spec.data_network.name
            || o.spec.data_network.cidr != spec.data_network.cidr
    });
    if data_changed {
        if let Err(e) = client
            .network_get_by_name(&spec.data_network.name, &spec.cloud_name)
            .await
        {
            errors.push(FieldError::invalid(
                "spec.dataNetwork.name",
                &spec.data_network.name,
                format!(
                    "failed to get data plane network {} from avi controller: {e}",
                    spec.data_network.name
                ),
            ));
        }
    }

    errors
}

/// Full admission decision for a create (`old == None`) or update.
///
/// # Errors
///
/// Returns every [`FieldError`] found.
pub async fn validate(
    client: &dyn AviClient,
    config: &AKODeploymentConfig,
    old: Option<&AKODeploymentConfig>,
) -> Result<(), Vec<FieldError>> {
    let mut errors = validate_spec(config, old);
    errors.extend(validate_avi_references(client, config, old).await);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
