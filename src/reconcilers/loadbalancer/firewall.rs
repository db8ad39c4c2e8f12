// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Child FirewallRules of a Loadbalancer.
//!
//! Each listener gets one FirewallRule named `<lb>-<port>` opening the
//! listener port on the primary VIP for the Loadbalancer's source addresses.
//! Children carry a controller owner reference to the Loadbalancer and the
//! Loadbalancer finalizer, which is released only after the FirewallRule
//! operator reports the rule `Terminated`.

use crate::constants::{
    DEFAULT_FIREWALL_PROTOCOL, KIND_FIREWALL_RULE, KIND_LOADBALANCER, LOADBALANCER_FINALIZER,
};
use crate::context::LoadbalancerContext;
use crate::crd::{FirewallRule, FirewallRuleSpec, FirewallRuleStatus, Loadbalancer};
use crate::metrics;
use crate::reconcilers::finalizers::{persist_finalizer, FinalizerOperation};
use crate::reconcilers::status::{is_condition_false, persist_status, MissingPolicy};
use crate::status_reasons::{CONDITION_TERMINATED, MESSAGE_RULE_RECONCILING, STATE_RECONCILING};
use anyhow::{anyhow, Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[must_use]
pub fn firewall_rule_name(lb_name: &str, port: i32) -> String {
    format!("{lb_name}-{port}")
}

/// Whether `rule` is controlled by `lb`.
///
/// Matches on the owner uid when the Loadbalancer has one, else on kind and name.
#[must_use]
pub fn is_controlled_by(rule: &FirewallRule, lb: &Loadbalancer) -> bool {
    let uid = lb.uid();
    let name = lb.name_any();
    rule.owner_references().iter().any(|owner| {
        owner.controller == Some(true)
            && owner.kind == KIND_LOADBALANCER
            && match &uid {
                Some(uid) => owner.uid == *uid,
                None => owner.name == name,
            }
    })
}

/// FirewallRules of the Loadbalancer's namespace controlled by it.
///
/// # Errors
///
/// Returns the store error when listing fails.
pub async fn controlled_rules(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
) -> Result<Vec<FirewallRule>> {
    let namespace = lb.namespace().unwrap_or_default();
    Ok(ctx
        .firewall_rules
        .list(&namespace)
        .await
        .with_context(|| format!("failed to list FirewallRules in {namespace}"))?
        .into_iter()
        .filter(|rule| is_controlled_by(rule, lb))
        .collect())
}

fn desired_spec(lb: &Loadbalancer, port: i32, vip: &str) -> FirewallRuleSpec {
    FirewallRuleSpec {
        source_ips: lb.spec.security.sourceips.clone(),
        destination_ip: vip.to_string(),
        port: port.to_string(),
        protocol: DEFAULT_FIREWALL_PROTOCOL.to_string(),
    }
}

/// Create or refresh one FirewallRule per listener once the VIP is known.
///
/// New rules start in state `Reconciling`.
///
/// # Errors
///
/// Returns an error when the Loadbalancer has no uid or a store write fails.
pub async fn provision_firewall_rules(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
    existing: &[FirewallRule],
) -> Result<()> {
    let vip = lb.status.as_ref().map(|s| s.vip.as_str()).unwrap_or_default();
    if vip.is_empty() {
        debug!(name = %lb.name_any(), "No VIP assigned yet, skipping firewall rules");
        return Ok(());
    }
    let namespace = lb.namespace().unwrap_or_default();
    let lb_name = lb.name_any();

    for listener in &lb.spec.listeners {
        let port = listener.vip.port;
        let name = firewall_rule_name(&lb_name, port);
        let spec = desired_spec(lb, port, vip);

        if let Some(current) = existing.iter().find(|r| r.name_any() == name) {
            if current.metadata.deletion_timestamp.is_none() && current.spec != spec {
                info!(namespace = %namespace, name = %name, "Updating FirewallRule");
                let mut updated = current.clone();
                updated.spec = spec;
                ctx.firewall_rules
                    .replace(&updated)
                    .await
                    .with_context(|| format!("failed to update FirewallRule {namespace}/{name}"))?;
                metrics::record_resource_updated(KIND_FIREWALL_RULE);
            }
            continue;
        }

        let owner = lb
            .controller_owner_ref(&())
            .ok_or_else(|| anyhow!("Loadbalancer {namespace}/{lb_name} has no uid"))?;
        let mut rule = FirewallRule {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: Some(vec![owner]),
                finalizers: Some(vec![LOADBALANCER_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec,
            status: None,
        };
        info!(namespace = %namespace, name = %name, "Creating FirewallRule");
        ctx.firewall_rules
            .create(&rule)
            .await
            .with_context(|| format!("failed to create FirewallRule {namespace}/{name}"))?;
        metrics::record_resource_created(KIND_FIREWALL_RULE);

        rule.status = Some(FirewallRuleStatus {
            state: STATE_RECONCILING.to_string(),
            message: MESSAGE_RULE_RECONCILING.to_string(),
            ..Default::default()
        });
        persist_status(&*ctx.firewall_rules, &rule, MissingPolicy::Conflict)
            .await
            .with_context(|| {
                format!("failed to initialise status of FirewallRule {namespace}/{name}")
            })?;
    }
    Ok(())
}

/// Delete `rule` if needed and release it once the firewall side is done.
///
/// Returns `true` while the FirewallRule operator is still removing it.
async fn release_rule(ctx: &LoadbalancerContext, rule: &FirewallRule) -> Result<bool> {
    let namespace = rule.namespace().unwrap_or_default();
    let name = rule.name_any();

    if rule.metadata.deletion_timestamp.is_none() {
        info!(namespace = %namespace, name = %name, "Deleting FirewallRule");
        match ctx.firewall_rules.delete(&namespace, &name).await {
            Ok(()) => metrics::record_resource_deleted(KIND_FIREWALL_RULE),
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to delete FirewallRule {namespace}/{name}"));
            }
        }
    }

    let terminating = rule
        .status
        .as_ref()
        .is_some_and(|s| is_condition_false(&s.conditions, CONDITION_TERMINATED));
    if terminating {
        debug!(namespace = %namespace, name = %name, "Waiting for FirewallRule to terminate");
        return Ok(true);
    }

    persist_finalizer(
        &*ctx.firewall_rules,
        FinalizerOperation::Remove,
        rule,
        LOADBALANCER_FINALIZER,
    )
    .await
    .with_context(|| format!("failed to release FirewallRule {namespace}/{name}"))?;
    Ok(false)
}

/// Release every rule in `rules`. Returns `true` while any is still pending.
///
/// # Errors
///
/// Returns the first store failure.
pub async fn release_firewall_rules(
    ctx: &LoadbalancerContext,
    rules: &[FirewallRule],
) -> Result<bool> {
    let mut pending = false;
    for rule in rules {
        pending |= release_rule(ctx, rule).await?;
    }
    Ok(pending)
}

/// Release the rules of ports no longer listed in the spec, plus `removed`.
///
/// # Errors
///
/// Returns the first store failure.
pub async fn prune_firewall_rules(
    ctx: &LoadbalancerContext,
    lb: &Loadbalancer,
    existing: &[FirewallRule],
    removed: &BTreeSet<i32>,
) -> Result<bool> {
    let lb_name = lb.name_any();
    let wanted: BTreeSet<String> = lb
        .spec
        .listeners
        .iter()
        .map(|l| l.vip.port)
        .filter(|port| !removed.contains(port))
        .map(|port| firewall_rule_name(&lb_name, port))
        .collect();

    let stale: Vec<FirewallRule> = existing
        .iter()
        .filter(|rule| !wanted.contains(&rule.name_any()))
        .cloned()
        .collect();
    release_firewall_rules(ctx, &stale).await
}

#[cfg(test)]
#[path = "firewall_tests.rs"]
mod firewall_tests;
