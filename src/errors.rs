// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation error taxonomy.
//!
//! Every reconcile path returns [`ReconcileError`]. The controller error policy
//! consults [`ReconcileError::is_retryable`] to pick a requeue interval, and the
//! configuration reconciler turns failures into status conditions. Nothing here
//! ever aborts the process.

use crate::avi::AviError;
use thiserror::Error;

/// Errors produced while reconciling configurations, clusters, and machines.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Declared input is invalid. Never retried.
    #[error("Invalid {kind} '{name}': {reason}")]
    Validation {
        /// Kind of the offending object
        kind: String,
        /// Name of the offending object
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// A referenced object is missing.
    ///
    /// `retryable` is true when the object is expected to show up later, e.g. an
    /// `AviInfraSetting` that another controller has not created yet.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name (or namespace/name) of the missing object
        name: String,
        /// Whether waiting may fix it
        retryable: bool,
    },

    /// Optimistic-concurrency write conflict; resolved by re-fetch and retry.
    #[error("Conflict writing {kind} '{name}': resource version is stale")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name (or namespace/name) of the object being written
        name: String,
    },

    /// API server, Avi controller, or DNS unreachable.
    #[error("Transport error talking to {target}: {reason}")]
    Transport {
        /// What was being contacted
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// A deadline expired or the call was cancelled.
    #[error("Call to {target} timed out or was cancelled")]
    Cancelled {
        /// What was being contacted
        target: String,
    },

    /// Persisted state breaks an invariant (e.g. two owners claiming a cluster).
    ///
    /// Never written back as-is; corrected on the next invocation.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Avi controller call failed
    #[error(transparent)]
    Avi(#[from] AviError),

    /// Rendering or parsing a payload failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A failure attributed to one cluster by the phase engine
    #[error("Cluster {cluster}: {source}")]
    Cluster {
        /// `namespace/name` of the cluster
        cluster: String,
        /// What went wrong for that cluster
        source: Box<ReconcileError>,
    },

    /// Several clusters failed in one invocation
    #[error("{} cluster(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ReconcileError>),
}

fn join_errors(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Builds a `NotFound` for an object expected to appear later.
    #[must_use]
    pub fn pending(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            retryable: true,
        }
    }

    /// Maps a Kubernetes client error onto the taxonomy.
    ///
    /// 404 becomes a retryable `NotFound`, 409 a `Conflict`, everything else
    /// `Transport`.
    #[must_use]
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::pending(kind, name),
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 400 || resp.code == 422 => Self::Validation {
                kind: kind.to_string(),
                name: name.to_string(),
                reason: resp.message.clone(),
            },
            _ => Self::Transport {
                target: format!("kubernetes ({kind} '{name}')"),
                reason: err.to_string(),
            },
        }
    }

    /// Attaches a cluster identity, as the phase engine does for every failure.
    #[must_use]
    pub fn for_cluster(self, cluster: &str) -> Self {
        Self::Cluster {
            cluster: cluster.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns true if requeueing soon may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound { retryable, .. } => *retryable,
            Self::Conflict { .. }
            | Self::Transport { .. }
            | Self::Cancelled { .. }
            | Self::InvariantViolation(_) => true,
            Self::Validation { .. } | Self::Serialization(_) => false,
            Self::Avi(err) => err.is_retryable(),
            Self::Cluster { source, .. } => source.is_retryable(),
            Self::Aggregate(errors) => errors.iter().any(Self::is_retryable),
        }
    }

    /// True for an optimistic-concurrency conflict, looking through cluster wrappers.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Cluster { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// True for a missing object, looking through cluster wrappers.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Cluster { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Kubernetes status reason for this error.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationFailed",
            Self::NotFound { .. } => "DependencyNotFound",
            Self::Conflict { .. } => "Conflict",
            Self::Transport { .. } => "TransportError",
            Self::Cancelled { .. } => "Timeout",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::Avi(_) => "AviControllerError",
            Self::Serialization(_) => "SerializationFailed",
            Self::Cluster { source, .. } => source.status_reason(),
            Self::Aggregate(_) => "PartialFailure",
        }
    }

    /// Short label used for the `errors_total` metric.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Transport { .. } => "transport",
            Self::Cancelled { .. } => "cancelled",
            Self::InvariantViolation(_) => "invariant",
            Self::Avi(_) => "avi",
            Self::Serialization(_) => "serialization",
            Self::Cluster { source, .. } => source.metric_label(),
            Self::Aggregate(_) => "aggregate",
        }
    }
}

impl From<serde_yaml::Error> for ReconcileError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ReconcileError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Cancelled {
            target: "operation".to_string(),
        }
    }
}
