// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for `AKODeploymentConfig`.
//!
//! # Condition Format
//!
//! Conditions follow the Kubernetes conventions:
//! - `type`: The aspect being reported (`Ready`, `ClustersReconciled`)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! # Example
//!
//! ```rust,no_run
//! use ako_operator::reconcilers::status::create_condition;
//!
//! let condition = create_condition(
//!     "Ready",
//!     "True",
//!     "AllClustersReconciled",
//!     "3 cluster(s) reconciled"
//! );
//! ```

use crate::crd::{AKODeploymentConfig, AKODeploymentConfigStatus, Condition};
use crate::errors::ReconcileError;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Create a new condition stamped with the current time.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g., "Ready")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase`
/// * `message` - A human-readable explanation
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Check if a condition differs from the existing one in type, status, or message.
#[must_use]
pub fn condition_changed(existing: &Option<Condition>, new_condition: &Condition) -> bool {
    if let Some(current) = existing {
        current.r#type != new_condition.r#type
            || current.status != new_condition.status
            || current.message != new_condition.message
    } else {
        true
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in place, without any API call.
///
/// `lastTransitionTime` is preserved when the status value does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists, ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    new.iter().all(|new_cond| {
        current.iter().any(|c| {
            c.r#type == new_cond.r#type
                && c.status == new_cond.status
                && c.reason == new_cond.reason
                && c.message == new_cond.message
        })
    })
}

/// Collects status changes for one `AKODeploymentConfig` and writes them in a
/// single patch.
///
/// A status write triggers a new watch event, so [`Self::apply`] skips the call
/// when nothing changed semantically.
pub struct AKODeploymentConfigStatusUpdater {
    name: String,
    current_status: Option<AKODeploymentConfigStatus>,
    new_status: AKODeploymentConfigStatus,
}

impl AKODeploymentConfigStatusUpdater {
    #[must_use]
    pub fn new(config: &AKODeploymentConfig) -> Self {
        let current_status = config.status.clone();
        let new_status = current_status.clone().unwrap_or_default();

        Self {
            name: config.name_any(),
            current_status,
            new_status,
        }
    }

    /// Update or add a condition (in-memory only).
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
        );
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        match &self.current_status {
            None => true,
            Some(current) => {
                current.observed_generation != self.new_status.observed_generation
                    || !conditions_equal(&current.conditions, &self.new_status.conditions)
            }
        }
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.new_status.conditions
    }

    /// Writes the collected status if it changed.
    ///
    /// # Errors
    ///
    /// Returns the mapped Kubernetes error if the status patch fails.
    pub async fn apply(&self, client: &Client) -> Result<(), ReconcileError> {
        if !self.has_changes() {
            debug!(config = %self.name, "AKODeploymentConfig status unchanged, skipping update");
            return Ok(());
        }

        let api: Api<AKODeploymentConfig> = Api::all(client.clone());
        let patch = json!({ "status": self.new_status });

        api.patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ReconcileError::from_kube(e, "AKODeploymentConfig", &self.name))?;

        debug!(
            config = %self.name,
            conditions = self.new_status.conditions.len(),
            "Updated AKODeploymentConfig status"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
