// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry helpers.
//!
//! Two flavours live here:
//!
//! - [`retry_api_call`] / [`retry_with_backoff`] retry *transient* failures
//!   (HTTP 429, 5xx, connection errors) with a time-bounded exponential
//!   backoff. Every Kubernetes API call and idempotent provider call goes
//!   through them.
//! - [`retry_on_conflict`] / [`retry_on_error`] wrap a whole read-modify-write
//!   cycle and retry it a small, fixed number of times when the write loses an
//!   optimistic-concurrency race. The closure must re-read the object on every
//!   attempt.

use rand::Rng;
use reqwest::StatusCode;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::store::StoreError;

/// Maximum total time to spend retrying Kubernetes API calls (5 minutes)
const MAX_ELAPSED_TIME_SECS: u64 = 300;

/// Initial retry interval for Kubernetes API calls (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between Kubernetes API retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Exponential growth factor
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Provider HTTP retry initial interval (50ms)
const HTTP_INITIAL_INTERVAL_MILLIS: u64 = 50;

/// Provider HTTP retry maximum interval (5 seconds)
const HTTP_MAX_INTERVAL_SECS: u64 = 5;

/// Provider HTTP retry maximum elapsed time (30 seconds)
const HTTP_MAX_ELAPSED_TIME_SECS: u64 = 30;

/// Exponential backoff with jitter, bounded by total elapsed time.
pub struct ExponentialBackoff {
    pub current_interval: Duration,
    pub max_interval: Duration,
    /// `None` retries forever
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    fn new(
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

    /// Next (jittered) delay, or `None` once the elapsed-time budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self
            .max_elapsed_time
            .is_some_and(|max| self.start_time.elapsed() >= max)
        {
            return None;
        }

        let interval = self.current_interval;
        self.current_interval = interval.mul_f64(self.multiplier).min(self.max_interval);

        Some(spread(interval, self.randomization_factor))
    }
}

/// Spread `interval` uniformly over `±factor`.
fn spread(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let jittered = rand::rng().random_range((secs - delta)..=(secs + delta));
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Backoff for Kubernetes API calls: 100ms doubling to 30s, for at most 5 minutes.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Backoff for load balancer appliance reads: 50ms doubling to 5s, for at
/// most 30 seconds.
#[must_use]
pub fn http_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(HTTP_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(HTTP_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(HTTP_MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// `true` for 429, 500, 502, 503 and 504.
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry `operation` while `is_retryable` holds, sleeping per `backoff`.
///
/// Returns the last error once the error is permanent or the backoff budget
/// is exhausted.
///
/// # Errors
///
/// The error of the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    mut backoff: ExponentialBackoff,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            debug!(operation = operation_name, error = %err, "Non-retryable error");
            return Err(err);
        }

        let Some(delay) = backoff.next_backoff() else {
            error!(
                operation = operation_name,
                attempt = attempt,
                elapsed = ?start_time.elapsed(),
                error = %err,
                "Backoff exhausted, giving up"
            );
            return Err(err);
        };

        warn!(
            operation = operation_name,
            attempt = attempt,
            retry_after = ?delay,
            error = %err,
            "Retryable error, will retry"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Retry a Kubernetes API call on transient errors.
///
/// # Errors
///
/// The final `kube::Error` when it is permanent (4xx other than 429) or the
/// five-minute budget is spent.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use lbops::crd::Loadbalancer;
/// use lbops::reconcilers::retry::retry_api_call;
///
/// # async fn example() -> Result<(), kube::Error> {
/// let client = Client::try_default().await?;
/// let api: Api<Loadbalancer> = Api::namespaced(client, "123456789123");
///
/// let lb = retry_api_call(|| api.get_opt("web"), "get loadbalancer web").await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(operation: F, operation_name: &str) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    retry_with_backoff(default_backoff(), operation_name, is_retryable_error, operation).await
}

/// `true` for API errors 429 and 5xx and for transport failures.
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => api_err.code == 429 || (500..600).contains(&api_err.code),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

// ============================================================================
// Optimistic-concurrency retries
// ============================================================================

/// Fixed-step backoff for read-modify-write retries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Total number of attempts
    pub steps: u32,
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Each delay is extended by up to `jitter * delay`
    pub jitter: f64,
}

/// Five attempts, 10ms apart, with 10% jitter.
pub const DEFAULT_RETRY: Backoff = Backoff {
    steps: 5,
    duration: Duration::from_millis(10),
    factor: 1.0,
    jitter: 0.1,
};

impl Backoff {
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        delay + delay.mul_f64(rand::rng().random_range(0.0..self.jitter))
    }
}

/// Run `operation` up to `backoff.steps` times while it fails with an error
/// accepted by `is_retryable`.
///
/// # Errors
///
/// The first non-retryable error, or the last error once the step budget is
/// spent.
pub async fn retry_on_error<T, F, Fut, P>(
    backoff: Backoff,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    P: Fn(&StoreError) -> bool,
{
    let mut delay = backoff.duration;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < backoff.steps && is_retryable(&e) => {
                debug!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    "Write lost a race, retrying"
                );
                tokio::time::sleep(backoff.jittered(delay)).await;
                delay = delay.mul_f64(backoff.factor);
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`retry_on_error`] retrying only [`StoreError::Conflict`].
///
/// # Errors
///
/// See [`retry_on_error`].
pub async fn retry_on_conflict<T, F, Fut>(
    backoff: Backoff,
    operation_name: &str,
    operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry_on_error(backoff, operation_name, StoreError::is_conflict, operation).await
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
