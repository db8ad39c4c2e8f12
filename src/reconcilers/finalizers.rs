// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management.
//!
//! Finalizers are persisted with the same pattern for Instances, Loadbalancers
//! and FirewallRules: re-fetch the latest object inside a conflict-retry loop,
//! treat a missing object as done, otherwise add or remove one token and write
//! back only `metadata.finalizers`.
//!
//! # Example
//!
//! ```rust,ignore
//! use lbops::constants::LOADBALANCER_FINALIZER;
//! use lbops::reconcilers::finalizers::{persist_finalizer, FinalizerOperation};
//!
//! persist_finalizer(&*store, FinalizerOperation::Add, &instance, LOADBALANCER_FINALIZER).await?;
//! ```

use crate::reconcilers::retry::{retry_on_conflict, DEFAULT_RETRY};
use crate::store::{ObjectStore, StoreError};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Direction of a finalizer change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerOperation {
    Add,
    Remove,
}

impl FinalizerOperation {
    fn verb(self) -> &'static str {
        match self {
            Self::Add => "Adding",
            Self::Remove => "Removing",
        }
    }
}

/// Whether `resource` currently carries `finalizer`.
#[must_use]
pub fn has_finalizer<K: Resource>(resource: &K, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// The finalizer list after `operation`, or `None` when nothing changes.
///
/// Removing drops every copy of `finalizer`.
#[must_use]
pub fn apply_finalizer(
    current: &[String],
    operation: FinalizerOperation,
    finalizer: &str,
) -> Option<Vec<String>> {
    let present = current.iter().any(|f| f == finalizer);
    match (operation, present) {
        (FinalizerOperation::Add, false) => {
            let mut finalizers = current.to_vec();
            finalizers.push(finalizer.to_string());
            Some(finalizers)
        }
        (FinalizerOperation::Remove, true) => Some(
            current
                .iter()
                .filter(|f| f.as_str() != finalizer)
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

/// Add or remove `finalizer` on the stored copy of `resource`.
///
/// Idempotent: adding a present token or removing an absent one performs no
/// write. A resource that no longer exists is treated as success.
///
/// # Errors
///
/// Returns the last [`StoreError`] when the write keeps conflicting past the
/// retry budget, or any non-conflict store failure.
pub async fn persist_finalizer<K, S>(
    store: &S,
    operation: FinalizerOperation,
    resource: &K,
    finalizer: &str,
) -> Result<(), StoreError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let kind = K::kind(&()).to_string();
    let operation_name =
        format!("{operation:?} finalizer {finalizer} on {kind} {namespace}/{name}");

    let (namespace, name, kind) = (&namespace, &name, &kind);
    retry_on_conflict(DEFAULT_RETRY, &operation_name, || async move {
        let Some(latest) = store.get(namespace, name).await? else {
            debug!(
                namespace = %namespace,
                name = %name,
                kind = %kind,
                "Object not found, finalizer already settled"
            );
            return Ok(());
        };

        let Some(finalizers) = apply_finalizer(latest.finalizers(), operation, finalizer) else {
            return Ok(());
        };

        info!(
            "{} finalizer {} on {}/{} {}",
            operation.verb(),
            finalizer,
            namespace,
            name,
            kind
        );

        let resource_version = latest.resource_version();
        match store
            .replace_finalizers(namespace, name, &finalizers, resource_version.as_deref())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    })
    .await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
