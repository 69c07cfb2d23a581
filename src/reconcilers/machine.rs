// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API `Machine` reconciliation logic.
//!
//! Keeps a cluster's HA `Endpoints` member list in step with its control-plane
//! machines. Nothing happens unless Avi is the control-plane HA provider.

use crate::context::Context;
use crate::crd::Machine;
use crate::errors::ReconcileError;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Reconciles a Cluster API `Machine`.
///
/// # Errors
///
/// Kubernetes failures while updating the `Endpoints` object.
pub async fn reconcile_machine(ctx: Arc<Context>, machine: Machine) -> Result<(), ReconcileError> {
    if !ctx.ha_provider.enabled() {
        debug!(machine = %machine.name_any(), "Avi is not the HA provider, skipping Machine");
        return Ok(());
    }
    ctx.ha_provider.reconcile_machine(&machine).await
}
