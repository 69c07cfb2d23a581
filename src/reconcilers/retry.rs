// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry with exponential backoff for transient Kubernetes and Avi failures.
//!
//! Transient errors (HTTP 429, 5xx, connection failures) are retried in place with
//! jittered backoff. Everything else fails fast and is left to the controller's
//! requeue.

use crate::avi::AviError;
use crate::errors::ReconcileError;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Kubernetes API: first retry after 100ms
const KUBE_INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Kubernetes API: intervals never exceed 5 seconds
const KUBE_MAX_INTERVAL_SECS: u64 = 5;

/// Kubernetes API: give up after 30 seconds in total
const KUBE_MAX_ELAPSED_SECS: u64 = 30;

/// Avi controller: first retry after 250ms
const AVI_INITIAL_INTERVAL_MILLIS: u64 = 250;

/// Avi controller: intervals never exceed 10 seconds
const AVI_MAX_INTERVAL_SECS: u64 = 10;

/// Avi controller: give up after 60 seconds in total
const AVI_MAX_ELAPSED_SECS: u64 = 60;

/// Backoff multiplier
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub current_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Next interval, or `None` once the maximum elapsed time has passed.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor <= 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let jittered = rand::random_range((secs - delta)..=(secs + delta));

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff for Kubernetes API calls.
///
/// Retries at roughly 100ms, 200ms, 400ms, ... capped at 5s, for 30s in total.
#[must_use]
pub fn kube_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(KUBE_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(KUBE_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(KUBE_MAX_ELAPSED_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Backoff for Avi controller calls.
///
/// Retries at roughly 250ms, 500ms, 1s, ... capped at 10s, for 60s in total.
#[must_use]
pub fn avi_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(AVI_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(AVI_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(AVI_MAX_ELAPSED_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Whether a Kubernetes error is transient.
///
/// 429 and 5xx responses and connection-level failures are retryable; other API
/// errors (not found, conflict, invalid) are not.
#[must_use]
pub fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Runs `operation` until it succeeds, fails permanently, or `backoff` is spent.
///
/// # Arguments
///
/// * `backoff` - Schedule to follow between attempts
/// * `operation` - The call to retry
/// * `is_retryable` - Classifies a failure as transient
/// * `operation_name` - Human-readable name for logging
///
/// # Errors
///
/// Returns the last error once it is permanent or the backoff is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    mut backoff: ExponentialBackoff,
    mut operation: F,
    is_retryable: R,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed = ?start_time.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => match backoff.next_backoff() {
                Some(duration) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(e);
                }
            },
        }
    }
}

/// Retries a Kubernetes API call on transient errors, mapping the final error.
///
/// # Errors
///
/// The last [`kube::Error`] classified through [`ReconcileError::from_kube`].
///
/// # Example
///
/// ```no_run
/// use ako_operator::crd::Cluster;
/// use ako_operator::reconcilers::retry::retry_api_call;
/// use kube::{Api, Client};
///
/// # async fn example(client: Client) -> Result<(), ako_operator::errors::ReconcileError> {
/// let api: Api<Cluster> = Api::namespaced(client, "default");
/// let cluster = retry_api_call(|| api.get("workload-1"), "Cluster", "default/workload-1").await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(
    operation: F,
    kind: &str,
    name: &str,
) -> Result<T, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let operation_name = format!("{kind} {name}");
    retry_with_backoff(kube_backoff(), operation, is_retryable_kube_error, &operation_name)
        .await
        .map_err(|e| ReconcileError::from_kube(e, kind, name))
}

/// Retries an Avi call on transient [`AviError`]s.
///
/// # Errors
///
/// The last [`AviError`] once it is permanent or the backoff is exhausted.
pub async fn retry_avi_call<T, F, Fut>(operation: F, operation_name: &str) -> Result<T, AviError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AviError>>,
{
    retry_with_backoff(avi_backoff(), operation, AviError::is_transient, operation_name).await
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
