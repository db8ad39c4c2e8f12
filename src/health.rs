// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Liveness, readiness and metrics endpoints.
//!
//! The replicator reports unhealthy on `/healthz` once its source watch has
//! been silent for longer than [`WATCH_HEALTH_THRESHOLD`]. The operators have
//! no watch to track and are always live while the process runs.

use crate::constants::WATCH_HEALTH_THRESHOLD;
use crate::metrics::gather_metrics;
use crate::source_cache::WatchHealth;
use anyhow::{Context as _, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct HealthState {
    pub watch: Option<Arc<WatchHealth>>,
}

impl HealthState {
    #[must_use]
    pub fn with_watch(watch: Arc<WatchHealth>) -> Self {
        Self { watch: Some(watch) }
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz(State(state): State<HealthState>) -> (StatusCode, String) {
    watch_status(state.watch.as_deref(), WATCH_HEALTH_THRESHOLD)
}

fn watch_status(watch: Option<&WatchHealth>, threshold: Duration) -> (StatusCode, String) {
    match watch {
        Some(watch) if !watch.is_healthy(threshold) => {
            let silent = watch.since_reset();
            warn!(silent_secs = silent.as_secs(), "Source watch is stale");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("watch has been silent for {}s", silent.as_secs()),
            )
        }
        _ => (StatusCode::OK, "ok".to_string()),
    }
}

async fn readyz() -> &'static str {
    "ok"
}

async fn metrics() -> (StatusCode, String) {
    match gather_metrics() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve the health endpoints on `addr` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(addr: &str, state: HealthState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health server to {addr}"))?;
    info!("Health server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("health server failed")
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod health_tests;
