// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the lbops replicator and operators.
//!
//! Every metric carries the prefix `lbops_private_cloud_io_` (prometheus-safe
//! version of "lbops.private.cloud.io") and lives in [`METRICS_REGISTRY`],
//! which the health server exposes on `/metrics`.
//!
//! # Families
//!
//! - **Reconcile** - Outcomes, durations, requeues and errors per resource kind
//! - **Changes** - Objects the controllers created, updated or deleted
//! - **Upstream** - Compute API calls and source watch restarts
//!
//! # Example
//!
//! ```rust,no_run
//! use lbops::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("Loadbalancer", std::time::Duration::from_millis(250));
//! ```

use prometheus::core::Collector;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

const METRICS_NAMESPACE: &str = "lbops_private_cloud_io";

/// Reconcile latency buckets, in seconds. Appliance calls dominate the tail.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0];

/// Registry served on `/metrics`
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn metric_name(suffix: &str) -> String {
    format!("{METRICS_NAMESPACE}_{suffix}")
}

/// Register `collector` with [`METRICS_REGISTRY`] and hand it back.
///
/// Names and label sets are static, so a failure here is a programming error.
fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    METRICS_REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric registered twice");
    collector
}

fn counter_vec(suffix: &str, help: &str, labels: &[&str]) -> CounterVec {
    let opts = Opts::new(metric_name(suffix), help);
    register(CounterVec::new(opts, labels).expect("valid counter definition"))
}

// ============================================================================
// Reconcile
// ============================================================================

/// Reconciles by `resource_type` and `status` (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "reconciliations_total",
        "Reconciles finished, by resource kind and outcome",
        &["resource_type", "status"],
    )
});

pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        metric_name("reconciliation_duration_seconds"),
        "Wall time of one reconcile, by resource kind",
    )
    .buckets(DURATION_BUCKETS.to_vec());
    register(HistogramVec::new(opts, &["resource_type"]).expect("valid histogram definition"))
});

/// Requeues by `resource_type` and `reason` (`error`, `progress`, `finalizer_added`)
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "requeues_total",
        "Reconciles scheduled again, by resource kind and reason",
        &["resource_type", "reason"],
    )
});

pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "errors_total",
        "Errors raised while reconciling, by resource kind and category",
        &["resource_type", "error_type"],
    )
});

// ============================================================================
// Changes
// ============================================================================

/// Writes by `resource_type` and `action` (`created`, `updated`, `deleted`)
pub static RESOURCE_CHANGES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "resource_changes_total",
        "Objects written by the controllers, by resource kind and action",
        &["resource_type", "action"],
    )
});

// ============================================================================
// Upstream
// ============================================================================

/// Compute API calls by `method` (`SearchStreamPrivate`, `Watch`,
/// `UpdateStatus`, `RemoveFinalizer`) and `outcome`
pub static RPC_CALLS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "rpc_calls_total",
        "Compute API calls, by method and outcome",
        &["method", "outcome"],
    )
});

pub static WATCH_RESTARTS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    register(
        Counter::new(
            metric_name("watch_restarts_total"),
            "Times the source list/watch loop started over",
        )
        .expect("valid counter definition"),
    )
});

// ============================================================================
// Recorders
// ============================================================================

fn record_outcome(resource_type: &str, status: &str, duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&[resource_type, status]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    record_outcome(resource_type, "success", duration);
}

pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    record_outcome(resource_type, "error", duration);
}

/// Count a requeue under both the outcome and the reason counters.
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL.with_label_values(&[resource_type, "requeue"]).inc();
    REQUEUE_TOTAL.with_label_values(&[resource_type, reason]).inc();
}

pub fn record_resource_created(resource_type: &str) {
    RESOURCE_CHANGES_TOTAL.with_label_values(&[resource_type, "created"]).inc();
}

pub fn record_resource_updated(resource_type: &str) {
    RESOURCE_CHANGES_TOTAL.with_label_values(&[resource_type, "updated"]).inc();
}

pub fn record_resource_deleted(resource_type: &str) {
    RESOURCE_CHANGES_TOTAL.with_label_values(&[resource_type, "deleted"]).inc();
}

/// `error_type` is a short category such as `reconcile_error`.
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[resource_type, error_type]).inc();
}

pub fn record_rpc_call(method: &str, outcome: &str) {
    RPC_CALLS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_watch_restart() {
    WATCH_RESTARTS_TOTAL.inc();
}

/// Encode the registry in the Prometheus text format.
///
/// # Errors
///
/// Encoding failures, or output that is not UTF-8.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {e}")))
}
