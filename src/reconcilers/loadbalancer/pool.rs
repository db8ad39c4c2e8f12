// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pool member selection.
//!
//! A listener's pool is either an explicit list of instance resource ids or a
//! label selector that must match every key exactly. An instance is a usable
//! member only when it is ready: its `Running` condition is `True` and it is
//! not being deleted.

use crate::crd::{Instance, Loadbalancer, LoadbalancerListener, PoolStatusMember};
use crate::reconcilers::status::is_condition_true;
use crate::source_cache::ObjectKey;
use crate::status_reasons::CONDITION_INSTANCE_RUNNING;
use anyhow::{bail, Result};
use kube::ResourceExt;

/// Whether `listener` picks `instance` by static membership or selector.
#[must_use]
pub fn selects(listener: &LoadbalancerListener, instance: &Instance) -> bool {
    let pool = &listener.pool;
    if !pool.members.is_empty() {
        let name = instance.name_any();
        return pool.members.iter().any(|m| m.instance_resource_id == name);
    }
    !pool.instance_selectors.is_empty()
        && pool
            .instance_selectors
            .iter()
            .all(|(key, value)| instance.spec.labels.get(key) == Some(value))
}

/// Instances of the listener's pool, ready or not.
///
/// # Errors
///
/// Fails when the listener names neither static members nor selectors.
pub fn pool_instances<'a>(
    listener: &LoadbalancerListener,
    instances: &'a [Instance],
) -> Result<Vec<&'a Instance>> {
    let pool = &listener.pool;
    if pool.members.is_empty() && pool.instance_selectors.is_empty() {
        bail!(
            "no pool configuration found for listener on port {}: set members or instanceSelectors",
            listener.vip.port
        );
    }
    let mut selected: Vec<&Instance> = instances.iter().filter(|i| selects(listener, i)).collect();
    selected.sort_by_key(|i| i.name_any());
    Ok(selected)
}

#[must_use]
pub fn is_ready(instance: &Instance) -> bool {
    instance.metadata.deletion_timestamp.is_none()
        && instance
            .status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, CONDITION_INSTANCE_RUNNING))
}

/// First address of the first interface.
#[must_use]
pub fn instance_ip(instance: &Instance) -> Option<&str> {
    instance
        .status
        .as_ref()?
        .interfaces
        .first()?
        .addresses
        .first()
        .map(String::as_str)
        .filter(|ip| !ip.is_empty())
}

/// Ready members of the listener's pool with their pool status entries.
///
/// # Errors
///
/// See [`pool_instances`].
pub fn ready_members<'a>(
    listener: &LoadbalancerListener,
    instances: &'a [Instance],
) -> Result<Vec<(&'a Instance, PoolStatusMember)>> {
    Ok(pool_instances(listener, instances)?
        .into_iter()
        .filter(|i| is_ready(i))
        .filter_map(|i| {
            let ip = instance_ip(i)?;
            Some((
                i,
                PoolStatusMember {
                    instance_ref: i.name_any(),
                    ip_address: ip.to_string(),
                },
            ))
        })
        .collect())
}

/// Loadbalancers in the instance's namespace whose pools select it or still
/// report it as a member.
pub fn loadbalancers_for_instance<'a, I>(loadbalancers: I, instance: &Instance) -> Vec<ObjectKey>
where
    I: IntoIterator<Item = &'a Loadbalancer>,
{
    let namespace = instance.namespace();
    let name = instance.name_any();
    loadbalancers
        .into_iter()
        .filter(|lb| lb.namespace() == namespace)
        .filter(|lb| {
            lb.spec.listeners.iter().any(|l| selects(l, instance))
                || lb.status.as_ref().is_some_and(|s| {
                    s.listeners
                        .iter()
                        .flat_map(|l| &l.pool_members)
                        .any(|m| m.instance_ref == name)
                })
        })
        .filter_map(ObjectKey::of)
        .collect()
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod pool_tests;
