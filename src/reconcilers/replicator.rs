// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Replication of Compute API Server LoadBalancers into the cluster.
//!
//! The source side is the [`SourceCache`] kept in sync by the lister/watcher;
//! the target side is the Kubernetes `Loadbalancer` store. For every key the
//! replicator:
//!
//! 1. creates or updates the target object from the source object,
//! 2. deletes the target object once the source is marked for deletion, and
//!    releases the upstream finalizer when the target is gone,
//! 3. pushes the target status back upstream when it differs from what the
//!    source last reported.
//!
//! Reconciles of one key never overlap: the [`WorkQueue`] hands a key to at
//! most one worker at a time.

use crate::constants::{ERROR_REQUEUE_DURATION_SECS, KIND_LOADBALANCER};
use crate::convert::LoadBalancerConverter;
use crate::crd::{Loadbalancer, LoadbalancerStatus};
use crate::metrics;
use crate::pb::{
    LoadBalancerIdReference, LoadBalancerRemoveFinalizerRequest, LoadBalancerUpdateStatusRequest,
};
use crate::reconcilers::retry::{retry_on_conflict, retry_on_error, DEFAULT_RETRY};
use crate::source::LoadBalancerSource;
use crate::source_cache::{ObjectKey, SourceCache};
use crate::store::{Namespaces, ObjectStore};
use crate::workqueue::WorkQueue;
use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Outcome of the deletion branch.
#[derive(Debug)]
enum Deletion {
    /// The target still exists (its finalizers are running).
    Pending(LoadbalancerStatus),
    /// The target is gone.
    Complete,
}

pub struct LoadBalancerReplicator {
    source: Arc<dyn LoadBalancerSource>,
    target: Arc<dyn ObjectStore<Loadbalancer>>,
    namespaces: Arc<dyn Namespaces>,
    converter: LoadBalancerConverter,
    cache: Arc<SourceCache>,
}

impl LoadBalancerReplicator {
    pub fn new(
        source: Arc<dyn LoadBalancerSource>,
        target: Arc<dyn ObjectStore<Loadbalancer>>,
        namespaces: Arc<dyn Namespaces>,
        converter: LoadBalancerConverter,
        cache: Arc<SourceCache>,
    ) -> Self {
        Self {
            source,
            target,
            namespaces,
            converter,
            cache,
        }
    }

    /// Reconcile one key.
    ///
    /// A key missing from the source cache is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when a target write fails past its retry budget, or
    /// when an upstream call other than a benign "not found" fails.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let Some(source) = self.cache.get(key) else {
            debug!(key = %key, "LoadBalancer not in source cache, nothing to replicate");
            return Ok(());
        };

        let observed = if source.metadata.deletion_timestamp.is_none() {
            self.sync(&source).await?
        } else {
            match self.delete(&source).await? {
                Deletion::Pending(status) => Some(status),
                Deletion::Complete => {
                    self.remove_upstream_finalizer(&source).await?;
                    None
                }
            }
        };

        if let Some(status) = observed {
            let current = source.status.clone().unwrap_or_default();
            self.update_status_and_persist(&source, &current, &status)
                .await?;
        }
        Ok(())
    }

    /// Create or update the target from `source`, returning the target status.
    ///
    /// A freshly created target has no status of its own yet, so `None` is
    /// returned and nothing is pushed upstream.
    async fn sync(&self, source: &Loadbalancer) -> Result<Option<LoadbalancerStatus>> {
        let namespace = source.metadata.namespace.clone().unwrap_or_default();
        let name = source.metadata.name.clone().unwrap_or_default();

        self.namespaces
            .ensure(&namespace)
            .await
            .with_context(|| format!("failed to ensure namespace {namespace}"))?;

        let operation = format!("replicate {KIND_LOADBALANCER} {namespace}/{name}");
        let (ns, nm, target) = (&namespace, &name, &self.target);
        let status = retry_on_error(
            DEFAULT_RETRY,
            &operation,
            |e| e.is_conflict() || e.is_already_exists(),
            || async move {
                let Some(mut existing) = target.get(ns, nm).await? else {
                    info!(namespace = %ns, name = %nm, "Creating Loadbalancer");
                    target.create(&for_create(source)).await?;
                    metrics::record_resource_created(KIND_LOADBALANCER);
                    return Ok(None);
                };

                if needs_update(&existing, source) {
                    info!(namespace = %ns, name = %nm, "Updating Loadbalancer spec");
                    existing.spec = source.spec.clone();
                    existing.metadata.labels.clone_from(&source.metadata.labels);
                    existing
                        .metadata
                        .annotations
                        .clone_from(&source.metadata.annotations);
                    let updated = target.replace(&existing).await?;
                    metrics::record_resource_updated(KIND_LOADBALANCER);
                    return Ok(Some(updated.status.unwrap_or_default()));
                }
                Ok(Some(existing.status.unwrap_or_default()))
            },
        )
        .await
        .with_context(|| format!("failed to replicate Loadbalancer {namespace}/{name}"))?;
        Ok(status)
    }

    async fn delete(&self, source: &Loadbalancer) -> Result<Deletion> {
        let namespace = source.metadata.namespace.clone().unwrap_or_default();
        let name = source.metadata.name.clone().unwrap_or_default();
        let operation = format!("delete {KIND_LOADBALANCER} {namespace}/{name}");
        let (ns, nm, target) = (&namespace, &name, &self.target);

        retry_on_conflict(DEFAULT_RETRY, &operation, || async move {
            let Some(existing) = target.get(ns, nm).await? else {
                return Ok(Deletion::Complete);
            };
            if existing.metadata.deletion_timestamp.is_none() {
                info!(namespace = %ns, name = %nm, "Deleting Loadbalancer");
                match target.delete(ns, nm).await {
                    Ok(()) => metrics::record_resource_deleted(KIND_LOADBALANCER),
                    Err(e) if e.is_not_found() => return Ok(Deletion::Complete),
                    Err(e) => return Err(e),
                }
            }
            match target.get(ns, nm).await? {
                Some(remaining) => Ok(Deletion::Pending(remaining.status.unwrap_or_default())),
                None => Ok(Deletion::Complete),
            }
        })
        .await
        .with_context(|| format!("failed to delete Loadbalancer {namespace}/{name}"))
    }

    async fn remove_upstream_finalizer(&self, source: &Loadbalancer) -> Result<()> {
        let request = LoadBalancerRemoveFinalizerRequest {
            metadata: Some(self.id_reference(source)?),
        };
        info!(
            namespace = ?source.metadata.namespace,
            name = ?source.metadata.name,
            "Target removed, releasing upstream finalizer"
        );
        self.source
            .remove_finalizer(request)
            .await
            .context("RemoveFinalizer failed")
    }

    /// Push `new` upstream when it differs from `old`.
    ///
    /// "Not found" from the Compute API Server means the LoadBalancer is
    /// already gone upstream and is not an error.
    ///
    /// # Errors
    ///
    /// Returns any other `UpdateStatus` failure.
    pub async fn update_status_and_persist(
        &self,
        source: &Loadbalancer,
        old: &LoadbalancerStatus,
        new: &LoadbalancerStatus,
    ) -> Result<()> {
        if old == new {
            debug!(
                namespace = ?source.metadata.namespace,
                name = ?source.metadata.name,
                "Status unchanged, not pushing upstream"
            );
            return Ok(());
        }

        let mut snapshot = source.clone();
        snapshot.status = Some(new.clone());
        let message = self.converter.k8s_to_pb(&snapshot)?;
        let request = LoadBalancerUpdateStatusRequest {
            metadata: Some(self.id_reference(source)?),
            status: message.status,
        };

        match self.source.update_status(request).await {
            Ok(()) => Ok(()),
            Err(status) if status.code() == tonic::Code::NotFound => {
                info!(
                    namespace = ?source.metadata.namespace,
                    name = ?source.metadata.name,
                    "LoadBalancer no longer exists upstream, dropping status update"
                );
                Ok(())
            }
            Err(status) => Err(anyhow::Error::new(status).context("UpdateStatus failed")),
        }
    }

    fn id_reference(&self, source: &Loadbalancer) -> Result<LoadBalancerIdReference> {
        let message = self.converter.k8s_to_pb(source)?;
        let metadata = message.metadata.unwrap_or_default();
        Ok(LoadBalancerIdReference {
            cloud_account_id: metadata.cloud_account_id,
            resource_id: metadata.resource_id,
            resource_version: String::new(),
        })
    }

    /// Run `workers` reconcile loops until `queue` shuts down.
    ///
    /// A failed key is added back after the error requeue delay.
    pub async fn run(self: Arc<Self>, queue: Arc<WorkQueue<ObjectKey>>, workers: u16) {
        let mut handles = Vec::with_capacity(usize::from(workers));
        for worker in 0..workers.max(1) {
            let replicator = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                debug!(worker, "Replicator worker started");
                while let Some(key) = queue.get().await {
                    let start = Instant::now();
                    let result = replicator.reconcile(&key).await;
                    let elapsed = start.elapsed();
                    match result {
                        Ok(()) => {
                            metrics::record_reconciliation_success(KIND_LOADBALANCER, elapsed);
                        }
                        Err(e) => {
                            error!(key = %key, error = ?e, "Failed to replicate LoadBalancer");
                            metrics::record_reconciliation_error(KIND_LOADBALANCER, elapsed);
                            metrics::record_reconciliation_requeue(KIND_LOADBALANCER, "error");
                            queue.add_after(
                                key.clone(),
                                Duration::from_secs(ERROR_REQUEUE_DURATION_SECS),
                            );
                        }
                    }
                    queue.done(&key);
                }
                debug!(worker, "Replicator worker stopped");
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Replicator worker panicked");
            }
        }
    }
}

/// Feed keys from `triggers` into `queue` until the channel closes.
pub async fn forward_triggers(
    mut triggers: mpsc::Receiver<ObjectKey>,
    queue: Arc<WorkQueue<ObjectKey>>,
) {
    while let Some(key) = triggers.recv().await {
        queue.add(key);
    }
}

/// Copy of `source` suitable for creation in the target store.
fn for_create(source: &Loadbalancer) -> Loadbalancer {
    Loadbalancer {
        metadata: ObjectMeta {
            name: source.metadata.name.clone(),
            namespace: source.metadata.namespace.clone(),
            labels: source.metadata.labels.clone(),
            annotations: source.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: source.spec.clone(),
        status: None,
    }
}

fn needs_update(target: &Loadbalancer, source: &Loadbalancer) -> bool {
    target.spec != source.spec
        || target.metadata.labels != source.metadata.labels
        || target.metadata.annotations != source.metadata.annotations
}

#[cfg(test)]
#[path = "replicator_tests.rs"]
mod replicator_tests;
