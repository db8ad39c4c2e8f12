// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-listener provisioning steps.
//!
//! A listener moves through create virtual server, create pool, link, and
//! then stays in membership reconciliation. The current step is derived from
//! the three persisted flags on every pass, and a pass performs at most one
//! step that changes the appliance topology, so each step is observable in
//! status and retried on its own.

use super::pool::ready_members;
use crate::constants::LOADBALANCER_FINALIZER;
use crate::context::LoadbalancerContext;
use crate::crd::{
    ConditionsListenerStatus, Instance, ListenerStatus, Loadbalancer, LoadbalancerListener,
};
use crate::errors::ProviderError;
use crate::lbprovider::VipAddressing;
use crate::reconcilers::finalizers::{has_finalizer, persist_finalizer, FinalizerOperation};
use crate::status_reasons::{MESSAGE_LB_PROVISIONING, STATE_ERROR, STATE_PENDING};
use anyhow::{Context, Result};
use tracing::{debug, info};

/// Next step of a listener, derived from its flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerStep {
    CreateVirtualServer,
    CreatePool,
    LinkPool,
    ReconcileMembers,
}

impl ListenerStep {
    /// Step for the given flags. A pool is only created once it has a member.
    #[must_use]
    pub fn next(conditions: &ConditionsListenerStatus, has_ready_members: bool) -> Self {
        if !conditions.vip_created {
            Self::CreateVirtualServer
        } else if !conditions.pool_created && has_ready_members {
            Self::CreatePool
        } else if conditions.pool_created && !conditions.vip_pool_linked {
            Self::LinkPool
        } else {
            Self::ReconcileMembers
        }
    }
}

/// What a listener pass achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerProgress {
    /// A topology step was taken; requeue before touching other listeners.
    Advanced,
    /// Nothing could be done yet; requeue after the other listeners ran.
    Waiting,
    /// Provisioned and in sync.
    Settled,
}

/// Run the next step of one listener.
///
/// `conditions` and `status` are updated in place, including on error, where
/// `status.message` carries the provider's operator message.
///
/// # Errors
///
/// Returns an error when pool selection is misconfigured, a provider call
/// fails, or an Instance finalizer cannot be written.
pub async fn process_listener(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
    listener: &LoadbalancerListener,
    instances: &[Instance],
    primary_vip_existing: bool,
    conditions: &mut ConditionsListenerStatus,
    status: &mut ListenerStatus,
) -> Result<ListenerProgress> {
    let port = listener.vip.port;
    let members = ready_members(listener, instances)?;
    let step = ListenerStep::next(conditions, !members.is_empty());
    debug!(port, step = ?step, "Processing listener");

    match step {
        ListenerStep::CreateVirtualServer => {
            let addressing = if primary_vip_existing {
                VipAddressing::Existing
            } else {
                VipAddressing::Public
            };
            info!(port, addressing = addressing.as_str(), "Creating virtual server");
            let result = ctx.provider.create_virtual_server(lb, listener, addressing).await;
            provider_step(status, result)?;
            conditions.vip_created = true;
            pending(status);
            Ok(ListenerProgress::Advanced)
        }
        ListenerStep::CreatePool => {
            for (instance, _) in &members {
                hold(ctx, instance).await?;
            }
            let pool_members: Vec<_> = members.into_iter().map(|(_, m)| m).collect();
            info!(port, members = pool_members.len(), "Creating pool");
            let result = ctx.provider.create_pool(lb, listener, &pool_members).await;
            provider_step(status, result)?;
            conditions.pool_created = true;
            status.pool_members = pool_members;
            pending(status);
            Ok(ListenerProgress::Advanced)
        }
        ListenerStep::LinkPool => {
            let (vip_id, pool_id) = (status.vip_id, status.pool_id);
            if vip_id == 0 || pool_id == 0 {
                debug!(port, "Appliance ids not discovered yet, waiting to link");
                return Ok(ListenerProgress::Waiting);
            }
            info!(port, vip_id, pool_id, "Linking virtual server to pool");
            let result = ctx.provider.link_vs_to_pool(vip_id, pool_id).await;
            provider_step(status, result)?;
            conditions.vip_pool_linked = true;
            Ok(ListenerProgress::Advanced)
        }
        ListenerStep::ReconcileMembers => {
            for (instance, _) in &members {
                hold(ctx, instance).await?;
            }
            let pool_members: Vec<_> = members.into_iter().map(|(_, m)| m).collect();
            let pool_id = status.pool_id;
            if conditions.pool_created && pool_id != 0 {
                let result = ctx
                    .provider
                    .observe_current_and_reconcile(listener, pool_id, &pool_members)
                    .await;
                let changed = provider_step(status, result)?;
                if changed {
                    info!(port, members = pool_members.len(), "Pool membership updated");
                }
            }
            status.pool_members = pool_members;
            if conditions.vip_pool_linked {
                Ok(ListenerProgress::Settled)
            } else {
                Ok(ListenerProgress::Waiting)
            }
        }
    }
}

/// Record a provider failure on the listener before propagating it.
fn provider_step<T>(status: &mut ListenerStatus, result: Result<T, ProviderError>) -> Result<T> {
    result.map_err(|e| {
        status.state = STATE_ERROR.to_string();
        status.message = match &e {
            ProviderError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        };
        anyhow::Error::new(e)
    })
}

fn pending(status: &mut ListenerStatus) {
    status.state = STATE_PENDING.to_string();
    status.message = MESSAGE_LB_PROVISIONING.to_string();
}

/// Put the Loadbalancer finalizer on a pool member.
async fn hold(ctx: &LoadbalancerContext, instance: &Instance) -> Result<()> {
    if has_finalizer(instance, LOADBALANCER_FINALIZER) {
        return Ok(());
    }
    persist_finalizer(
        &*ctx.instances,
        FinalizerOperation::Add,
        instance,
        LOADBALANCER_FINALIZER,
    )
    .await
    .with_context(|| format!("failed to add finalizer to Instance {:?}", instance.metadata.name))
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod listener_tests;
