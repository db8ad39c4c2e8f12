// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Loadbalancer reconciliation.
//!
//! A pass refreshes the status from the appliance, provisions the child
//! FirewallRules once a VIP is known, advances each listener by at most one
//! step and finally persists the status, which is written only when it
//! changed.
//!
//! # Deletion
//!
//! Child FirewallRules go first: each one is deleted and the Loadbalancer
//! waits until the FirewallRule operator reports it `Terminated`. Only then
//! are the appliance objects removed, the pool members released and the
//! Loadbalancer's own finalizer dropped.

pub mod firewall;
pub mod listener;
pub mod pool;

pub use pool::loadbalancers_for_instance;

use crate::constants::{
    KIND_LOADBALANCER, LOADBALANCER_FINALIZER, PROGRESS_REQUEUE_DURATION_SECS,
    RESYNC_REQUEUE_DURATION_SECS,
};
use crate::context::LoadbalancerContext;
use crate::crd::{Instance, Loadbalancer, LoadbalancerStatus};
use crate::metrics;
use crate::reconcilers::finalizers::{has_finalizer, persist_finalizer, FinalizerOperation};
use crate::reconcilers::status::{persist_status, MissingPolicy};
use crate::status_reasons::{
    MESSAGE_LB_DELETED, MESSAGE_LB_DELETING, MESSAGE_LB_PROVISIONING, MESSAGE_LB_READY,
    MESSAGE_LB_REMOVING_FIREWALL_RULES, MESSAGE_NO_INSTANCES, STATE_ACTIVE, STATE_DELETED,
    STATE_DELETING, STATE_ERROR, STATE_PENDING,
};
use anyhow::{Context, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use listener::{process_listener, ListenerProgress};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    /// More work is pending; come back soon.
    Requeue,
    /// Converged; resync later.
    Done,
    /// The Loadbalancer is released.
    Released,
}

/// Reconcile one Loadbalancer and persist its status.
///
/// # Errors
///
/// Returns an error when a provider call or a store write fails. The status
/// observed up to the failure is still persisted.
pub async fn reconcile_loadbalancer(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
) -> Result<Action> {
    let namespace = lb.namespace().unwrap_or_default();
    let name = lb.name_any();
    let mut lb = lb.clone();

    let result = if lb.metadata.deletion_timestamp.is_some() {
        info!("Deleting Loadbalancer: {}/{}", namespace, name);
        process_deletion(ctx, &mut lb).await
    } else {
        info!("Reconciling Loadbalancer: {}/{}", namespace, name);
        process(ctx, &mut lb).await
    };

    let persisted = if result.as_ref().is_ok_and(|pass| *pass == Pass::Released) {
        Ok(false)
    } else {
        persist_status(&*ctx.loadbalancers, &lb, MissingPolicy::Ignore).await
    };
    let pass = result?;
    persisted
        .with_context(|| format!("failed to persist status of Loadbalancer {namespace}/{name}"))?;

    Ok(match pass {
        Pass::Requeue => {
            metrics::record_reconciliation_requeue(KIND_LOADBALANCER, "progress");
            Action::requeue(Duration::from_secs(PROGRESS_REQUEUE_DURATION_SECS))
        }
        Pass::Done => Action::requeue(Duration::from_secs(RESYNC_REQUEUE_DURATION_SECS)),
        Pass::Released => Action::await_change(),
    })
}

async fn process(ctx: &LoadbalancerContext, lb: &mut Loadbalancer) -> Result<Pass> {
    let namespace = lb.namespace().unwrap_or_default();
    let name = lb.name_any();

    if !has_finalizer(&*lb, LOADBALANCER_FINALIZER) {
        persist_finalizer(
            &*ctx.loadbalancers,
            FinalizerOperation::Add,
            &*lb,
            LOADBALANCER_FINALIZER,
        )
        .await
        .with_context(|| format!("failed to add finalizer to Loadbalancer {namespace}/{name}"))?;
        return Ok(Pass::Requeue);
    }

    let ports: Vec<i32> = lb.spec.listeners.iter().map(|l| l.vip.port).collect();
    {
        let status = lb.status.get_or_insert_with(LoadbalancerStatus::default);
        for &port in &ports {
            status.seed_listener(port);
        }
    }

    let rules = firewall::controlled_rules(ctx, lb).await?;
    ctx.provider
        .get_status(lb, &rules)
        .await
        .with_context(|| format!("failed to read appliance status of {namespace}/{name}"))?;
    firewall::provision_firewall_rules(ctx, lb, &rules).await?;

    let instances = ctx
        .instances
        .list(&namespace)
        .await
        .with_context(|| format!("failed to list Instances in {namespace}"))?;
    let primary_vip_existing = lb.status.as_ref().is_some_and(|s| !s.vip.is_empty());

    let mut waiting = false;
    for listener in &lb.spec.listeners {
        let port = listener.vip.port;
        let Some(status) = lb.status.as_mut() else {
            continue;
        };
        let (Some(mut conditions), Some(mut listener_status)) =
            (status.listener_conditions(port).cloned(), status.listener(port).cloned())
        else {
            continue;
        };

        let result = process_listener(
            ctx,
            &*lb,
            listener,
            &instances,
            primary_vip_existing,
            &mut conditions,
            &mut listener_status,
        )
        .await;

        if result.is_ok()
            && listener_status.state != STATE_ERROR
            && listener_status.pool_members.is_empty()
        {
            listener_status.message = MESSAGE_NO_INSTANCES.to_string();
        }
        if let Some(status) = lb.status.as_mut() {
            if let Some(c) = status.listener_conditions_mut(port) {
                *c = conditions;
            }
            if let Some(l) = status.listener_mut(port) {
                *l = listener_status;
            }
        }

        match result.with_context(|| format!("listener {port} of {namespace}/{name}"))? {
            ListenerProgress::Advanced => return Ok(Pass::Requeue),
            ListenerProgress::Waiting => waiting = true,
            ListenerProgress::Settled => {}
        }
    }

    release_unused_instances(ctx, lb, &instances).await?;

    let vip = lb.status.as_ref().map(|s| s.vip.clone()).unwrap_or_default();
    let removed = ctx
        .provider
        .reconcile_listeners(&name, &vip, &lb.spec.listeners)
        .await
        .with_context(|| format!("failed to remove stale listeners of {namespace}/{name}"))?;
    if !removed.is_empty() {
        info!(namespace = %namespace, name = %name, ports = ?removed, "Removed stale listeners");
    }
    waiting |= firewall::prune_firewall_rules(ctx, lb, &rules, &removed).await?;

    if let Some(status) = lb.status.as_mut() {
        let wanted: BTreeSet<i32> = ports.iter().copied().collect();
        status.conditions.listeners.retain(|c| wanted.contains(&c.port));
        status.listeners.retain(|l| wanted.contains(&l.port));

        let ready = !status.conditions.listeners.is_empty()
            && status.conditions.listeners.iter().all(|c| c.vip_pool_linked);
        if ready {
            status.state = STATE_ACTIVE.to_string();
            status.message = MESSAGE_LB_READY.to_string();
        } else {
            status.state = STATE_PENDING.to_string();
            status.message = MESSAGE_LB_PROVISIONING.to_string();
        }
    }

    Ok(if waiting { Pass::Requeue } else { Pass::Done })
}

/// Drop the Loadbalancer finalizer from Instances no Loadbalancer of the
/// namespace uses any more.
async fn release_unused_instances(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
    instances: &[Instance],
) -> Result<()> {
    let namespace = lb.namespace().unwrap_or_default();
    let name = lb.name_any();

    let mut assigned: HashSet<String> = member_ips(lb);
    for other in ctx
        .loadbalancers
        .list(&namespace)
        .await
        .with_context(|| format!("failed to list Loadbalancers in {namespace}"))?
    {
        if other.name_any() != name {
            assigned.extend(member_ips(&other));
        }
    }

    for instance in instances {
        if !has_finalizer(instance, LOADBALANCER_FINALIZER) {
            continue;
        }
        let in_use = pool::instance_ip(instance).is_some_and(|ip| assigned.contains(ip));
        if !in_use {
            debug!(
                namespace = %namespace,
                instance = %instance.name_any(),
                "Instance left every pool"
            );
            persist_finalizer(
                &*ctx.instances,
                FinalizerOperation::Remove,
                instance,
                LOADBALANCER_FINALIZER,
            )
            .await
            .with_context(|| format!("failed to release Instance {}", instance.name_any()))?;
        }
    }
    Ok(())
}

fn member_ips(lb: &Loadbalancer) -> HashSet<String> {
    lb.status
        .iter()
        .flat_map(|s| &s.listeners)
        .flat_map(|l| &l.pool_members)
        .map(|m| m.ip_address.clone())
        .collect()
}

async fn process_deletion(ctx: &LoadbalancerContext, lb: &mut Loadbalancer) -> Result<Pass> {
    let namespace = lb.namespace().unwrap_or_default();
    let name = lb.name_any();

    if !has_finalizer(&*lb, LOADBALANCER_FINALIZER) {
        debug!(namespace = %namespace, name = %name, "Loadbalancer already released");
        return Ok(Pass::Released);
    }

    set_state(lb, STATE_DELETING, MESSAGE_LB_DELETING);

    let rules = firewall::controlled_rules(ctx, lb).await?;
    if firewall::release_firewall_rules(ctx, &rules).await? {
        set_state(lb, STATE_DELETING, MESSAGE_LB_REMOVING_FIREWALL_RULES);
        return Ok(Pass::Requeue);
    }

    ctx.provider
        .process_finalizers(lb)
        .await
        .with_context(|| format!("failed to delete appliance objects of {namespace}/{name}"))?;

    let instances = ctx
        .instances
        .list(&namespace)
        .await
        .with_context(|| format!("failed to list Instances in {namespace}"))?;
    for listener in &lb.spec.listeners {
        let members = match pool::pool_instances(listener, &instances) {
            Ok(members) => members,
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    name = %name,
                    error = %e,
                    "Skipping listener without pool"
                );
                continue;
            }
        };
        for instance in members
            .into_iter()
            .filter(|i| has_finalizer(*i, LOADBALANCER_FINALIZER))
        {
            persist_finalizer(
                &*ctx.instances,
                FinalizerOperation::Remove,
                instance,
                LOADBALANCER_FINALIZER,
            )
            .await
            .with_context(|| format!("failed to release Instance {}", instance.name_any()))?;
        }
    }

    set_state(lb, STATE_DELETED, MESSAGE_LB_DELETED);
    persist_status(&*ctx.loadbalancers, &*lb, MissingPolicy::Ignore)
        .await
        .with_context(|| format!("failed to persist status of Loadbalancer {namespace}/{name}"))?;
    persist_finalizer(
        &*ctx.loadbalancers,
        FinalizerOperation::Remove,
        &*lb,
        LOADBALANCER_FINALIZER,
    )
    .await
    .with_context(|| format!("failed to remove finalizer from Loadbalancer {namespace}/{name}"))?;
    metrics::record_resource_deleted(KIND_LOADBALANCER);
    Ok(Pass::Released)
}

fn set_state(lb: &mut Loadbalancer, state: &str, message: &str) {
    let status = lb.status.get_or_insert_with(LoadbalancerStatus::default);
    status.state = state.to_string();
    status.message = message.to_string();
}

#[cfg(test)]
#[path = "loadbalancer_tests.rs"]
mod loadbalancer_tests;
