// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and status persistence.
//!
//! # Condition Format
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Ready", "Terminated")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! # Persistence
//!
//! [`persist_status`] re-fetches the latest object, compares the full status
//! struct with the desired one and writes the status subresource only when
//! they differ. Suppressing equal writes keeps resourceVersions stable and
//! avoids waking every watcher of the object.
//!
//! # Example
//!
//! ```rust,no_run
//! use lbops::reconcilers::status::{create_condition, set_status_condition};
//!
//! let mut conditions = Vec::new();
//! set_status_condition(
//!     &mut conditions,
//!     create_condition("Ready", "True", "RuleApplied", "Rule is ready"),
//! );
//! assert_eq!(conditions.len(), 1);
//! ```

use crate::crd::{Condition, FirewallRule, FirewallRuleStatus, Loadbalancer, LoadbalancerStatus};
use crate::reconcilers::retry::{retry_on_conflict, DEFAULT_RETRY};
use crate::status_reasons::{STATUS_FALSE, STATUS_TRUE};
use crate::store::{ObjectStore, StoreError};
use chrono::Utc;
use kube::{Resource, ResourceExt};
use std::fmt::Debug;
use tracing::{debug, info};

/// Create a new condition stamped with the current time.
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

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Insert or update a condition in place.
///
/// When a condition of the same type exists and its status is unchanged, the
/// existing `lastTransitionTime` is kept so that re-applying the same state
/// produces an identical status. Returns `true` when anything changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, mut new_condition: Condition) -> bool {
    let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.r#type == new_condition.r#type)
    else {
        if new_condition.last_transition_time.is_none() {
            new_condition.last_transition_time = Some(Utc::now().to_rfc3339());
        }
        conditions.push(new_condition);
        return true;
    };

    if existing.status == new_condition.status {
        new_condition
            .last_transition_time
            .clone_from(&existing.last_transition_time);
    } else if new_condition.last_transition_time.is_none() {
        new_condition.last_transition_time = Some(Utc::now().to_rfc3339());
    }

    if *existing == new_condition {
        return false;
    }
    *existing = new_condition;
    true
}

/// `true` only when the condition exists and is `False`.
///
/// A missing condition is neither true nor false.
#[must_use]
pub fn is_condition_false(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == STATUS_FALSE)
}

/// `true` only when the condition exists and is `True`.
#[must_use]
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Resources with a status subresource handled by [`persist_status`].
pub trait StatusSubresource: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    type Status: Clone + Debug + Default + PartialEq + Send + Sync;

    fn status_ref(&self) -> Option<&Self::Status>;

    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}

impl StatusSubresource for Loadbalancer {
    type Status = LoadbalancerStatus;

    fn status_ref(&self) -> Option<&LoadbalancerStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<LoadbalancerStatus> {
        &mut self.status
    }
}

impl StatusSubresource for FirewallRule {
    type Status = FirewallRuleStatus;

    fn status_ref(&self) -> Option<&FirewallRuleStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<FirewallRuleStatus> {
        &mut self.status
    }
}

/// What [`persist_status`] does when the object is not in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingPolicy {
    /// The object is gone; nothing to write.
    Ignore,
    /// The object may not be visible yet (just created); retry as a conflict
    /// until it shows up or the retry budget is spent.
    Conflict,
}

/// Write `resource`'s status onto the latest stored copy when they differ.
///
/// Returns `true` when a status write happened.
///
/// # Errors
///
/// Returns the final [`StoreError`] once the conflict budget is spent, or any
/// other store failure.
pub async fn persist_status<K, S>(
    store: &S,
    resource: &K,
    missing: MissingPolicy,
) -> Result<bool, StoreError>
where
    K: StatusSubresource,
    S: ObjectStore<K> + ?Sized,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let kind = K::kind(&()).to_string();
    let desired = resource.status_ref().cloned().unwrap_or_default();
    let operation_name = format!("update status of {kind} {namespace}/{name}");

    let (namespace, name, kind, desired) = (&namespace, &name, &kind, &desired);
    retry_on_conflict(DEFAULT_RETRY, &operation_name, || async move {
        let Some(mut latest) = store.get(namespace, name).await? else {
            return match missing {
                MissingPolicy::Ignore => {
                    info!(
                        namespace = %namespace,
                        name = %name,
                        kind = %kind,
                        "Object not found, skipping status update"
                    );
                    Ok(false)
                }
                MissingPolicy::Conflict => Err(StoreError::Conflict {
                    kind: kind.clone(),
                    namespace: namespace.clone(),
                    name: name.clone(),
                    message: "object not yet visible".to_string(),
                }),
            };
        };

        if latest.status_ref().cloned().unwrap_or_default() == *desired {
            debug!(
                namespace = %namespace,
                name = %name,
                kind = %kind,
                "Status does not need to be changed"
            );
            return Ok(false);
        }

        debug!(
            namespace = %namespace,
            name = %name,
            kind = %kind,
            current = ?latest.status_ref(),
            desired = ?desired,
            "Status mismatch, updating"
        );
        *latest.status_mut() = Some(desired.clone());
        match store.replace_status(&latest).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() && missing == MissingPolicy::Ignore => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
