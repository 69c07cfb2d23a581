// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition types and reasons for `AKODeploymentConfig`.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a
//! condition has a particular status.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   observedGeneration: 3
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: AllClustersReconciled
//!       message: "2 cluster(s) reconciled"
//!     - type: ClustersReconciled
//!       status: "False"
//!       reason: PartialFailure
//!       message: "default/wc-1: avi controller unreachable"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Encompassing condition for the configuration
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Outcome of the last phase run over the matched clusters
pub const CONDITION_TYPE_CLUSTERS_RECONCILED: &str = "ClustersReconciled";

// ============================================================================
// Reasons
// ============================================================================

/// Every matched cluster was reconciled.
pub const REASON_ALL_CLUSTERS_RECONCILED: &str = "AllClustersReconciled";

/// Some matched clusters failed; the others were committed.
pub const REASON_PARTIAL_FAILURE: &str = "PartialFailure";

/// The configuration currently owns no cluster.
pub const REASON_NO_CLUSTERS: &str = "NoClusters";

/// A phase asked to be retried later (e.g. waiting on AKO cleanup).
pub const REASON_PROGRESSING: &str = "Progressing";

/// The configuration is being deleted and is releasing its clusters.
pub const REASON_RELEASING_CLUSTERS: &str = "ReleasingClusters";

/// Configuration failed a pre-condition check.
pub const REASON_CONFIGURATION_INVALID: &str = "ConfigurationInvalid";
