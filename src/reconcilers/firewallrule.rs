// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! FirewallRule reconciliation.
//!
//! All FirewallRules of a namespace that point at the same destination VIP
//! are applied together: the firewall API is converged on the full set every
//! time one of them changes, so the diff engine sees the complete desired
//! state of that VIP.

use crate::constants::{
    FIREWALL_FINALIZER, KIND_FIREWALL_RULE, PROGRESS_REQUEUE_DURATION_SECS,
    RESYNC_REQUEUE_DURATION_SECS,
};
use crate::context::FirewallContext;
use crate::crd::{FirewallRule, FirewallRuleStatus};
use crate::metrics;
use crate::reconcilers::finalizers::{has_finalizer, persist_finalizer, FinalizerOperation};
use crate::reconcilers::status::{
    create_condition, persist_status, set_status_condition, MissingPolicy,
};
use crate::status_reasons::{
    CONDITION_READY, CONDITION_RECONCILING, CONDITION_TERMINATED, MESSAGE_RULE_DELETED,
    MESSAGE_RULE_DELETING, MESSAGE_RULE_READY, MESSAGE_RULE_RECONCILING, REASON_RECONCILED,
    REASON_RECONCILING, REASON_RULE_APPLIED, REASON_RULE_DELETING, REASON_RULE_REMOVED,
    REASON_RULE_SYNC_FAILED, STATE_ACTIVE, STATE_DELETED, STATE_DELETING, STATE_RECONCILING,
    STATUS_FALSE, STATUS_TRUE,
};
use anyhow::{Context, Result};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reconcile one FirewallRule.
///
/// # Errors
///
/// Returns an error when a store write fails or the firewall API rejects the
/// change. The error message is also written to `status.message`.
pub async fn reconcile_firewall_rule(ctx: &FirewallContext, rule: &FirewallRule) -> Result<Action> {
    let namespace = rule.namespace().unwrap_or_default();
    let name = rule.name_any();
    let mut rule = rule.clone();

    if rule.metadata.deletion_timestamp.is_some() {
        return delete_firewall_rule(ctx, &mut rule).await;
    }

    info!("Reconciling FirewallRule: {}/{}", namespace, name);
    // Active rules stay Active while they are re-synced.
    let active = rule.status.as_ref().is_some_and(|s| s.state == STATE_ACTIVE);
    if !active {
        let status = rule.status.get_or_insert_with(FirewallRuleStatus::default);
        set_conditions(
            status,
            (STATUS_TRUE, REASON_RECONCILING, MESSAGE_RULE_RECONCILING),
            (STATUS_FALSE, REASON_RECONCILING, MESSAGE_RULE_RECONCILING),
            (STATUS_FALSE, REASON_RECONCILING, MESSAGE_RULE_RECONCILING),
        );
        status.state = STATE_RECONCILING.to_string();
        status.message = MESSAGE_RULE_RECONCILING.to_string();
        persist_status(&*ctx.rules, &rule, MissingPolicy::Ignore).await?;
    }

    if !has_finalizer(&rule, FIREWALL_FINALIZER) {
        persist_finalizer(&*ctx.rules, FinalizerOperation::Add, &rule, FIREWALL_FINALIZER).await?;
        metrics::record_reconciliation_requeue(KIND_FIREWALL_RULE, "finalizer_added");
        return Ok(Action::requeue(Duration::from_secs(PROGRESS_REQUEUE_DURATION_SECS)));
    }

    if let Err(e) = sync_rules(ctx, &rule).await {
        let message = format!("{e:#}");
        warn!(
            namespace = %namespace,
            name = %name,
            error = %message,
            "Failed to sync firewall rules"
        );
        if let Some(status) = rule.status.as_mut() {
            set_status_condition(
                &mut status.conditions,
                create_condition(CONDITION_READY, STATUS_FALSE, REASON_RULE_SYNC_FAILED, &message),
            );
            status.message = message;
        }
        persist_status(&*ctx.rules, &rule, MissingPolicy::Ignore).await?;
        return Err(e);
    }

    if let Some(status) = rule.status.as_mut() {
        set_conditions(
            status,
            (STATUS_FALSE, REASON_RECONCILED, MESSAGE_RULE_READY),
            (STATUS_TRUE, REASON_RULE_APPLIED, MESSAGE_RULE_READY),
            (STATUS_FALSE, REASON_RECONCILED, MESSAGE_RULE_READY),
        );
        status.state = STATE_ACTIVE.to_string();
        status.message = MESSAGE_RULE_READY.to_string();
    }
    persist_status(&*ctx.rules, &rule, MissingPolicy::Ignore).await?;
    debug!(namespace = %namespace, name = %name, "FirewallRule is active");

    Ok(Action::requeue(Duration::from_secs(RESYNC_REQUEUE_DURATION_SECS)))
}

async fn delete_firewall_rule(ctx: &FirewallContext, rule: &mut FirewallRule) -> Result<Action> {
    let namespace = rule.namespace().unwrap_or_default();
    let name = rule.name_any();

    if !has_finalizer(&*rule, FIREWALL_FINALIZER) {
        debug!(namespace = %namespace, name = %name, "FirewallRule already released");
        return Ok(Action::await_change());
    }

    info!("Deleting FirewallRule: {}/{}", namespace, name);
    {
        let status = rule.status.get_or_insert_with(FirewallRuleStatus::default);
        set_status_condition(
            &mut status.conditions,
            create_condition(
                CONDITION_RECONCILING,
                STATUS_TRUE,
                REASON_RULE_DELETING,
                MESSAGE_RULE_DELETING,
            ),
        );
        set_status_condition(
            &mut status.conditions,
            create_condition(
                CONDITION_READY,
                STATUS_FALSE,
                REASON_RULE_DELETING,
                MESSAGE_RULE_DELETING,
            ),
        );
        status.state = STATE_DELETING.to_string();
        status.message = MESSAGE_RULE_DELETING.to_string();
    }
    persist_status(&*ctx.rules, &*rule, MissingPolicy::Ignore).await?;

    ctx.provider
        .remove_access(rule)
        .await
        .with_context(|| format!("failed to remove firewall access for {namespace}/{name}"))?;

    if let Some(status) = rule.status.as_mut() {
        set_status_condition(
            &mut status.conditions,
            create_condition(
                CONDITION_TERMINATED,
                STATUS_TRUE,
                REASON_RULE_REMOVED,
                MESSAGE_RULE_DELETED,
            ),
        );
        status.state = STATE_DELETED.to_string();
        status.message = MESSAGE_RULE_DELETED.to_string();
    }
    persist_status(&*ctx.rules, &*rule, MissingPolicy::Ignore).await?;

    persist_finalizer(&*ctx.rules, FinalizerOperation::Remove, &*rule, FIREWALL_FINALIZER).await?;
    Ok(Action::await_change())
}

/// Converge the firewall on every live rule of the namespace targeting the
/// same destination as `rule`.
async fn sync_rules(ctx: &FirewallContext, rule: &FirewallRule) -> Result<()> {
    let namespace = rule.namespace().unwrap_or_default();
    let vip = &rule.spec.destination_ip;

    let desired: Vec<FirewallRule> = ctx
        .rules
        .list(&namespace)
        .await?
        .into_iter()
        .filter(|r| r.metadata.deletion_timestamp.is_none() && r.spec.destination_ip == *vip)
        .collect();

    let existing = ctx
        .provider
        .get_existing_customer_access(&namespace, vip)
        .await
        .with_context(|| format!("failed to read firewall access for {vip}"))?;

    ctx.provider
        .sync_firewall_rules(&desired, &existing, vip, &namespace)
        .await
        .with_context(|| format!("failed to sync firewall rules for {vip}"))?;
    Ok(())
}

/// Set Reconciling, Ready and Terminated in one go.
fn set_conditions(
    status: &mut FirewallRuleStatus,
    reconciling: (&str, &str, &str),
    ready: (&str, &str, &str),
    terminated: (&str, &str, &str),
) {
    for (condition_type, (value, reason, message)) in [
        (CONDITION_RECONCILING, reconciling),
        (CONDITION_READY, ready),
        (CONDITION_TERMINATED, terminated),
    ] {
        set_status_condition(
            &mut status.conditions,
            create_condition(condition_type, value, reason, message),
        );
    }
}

#[cfg(test)]
#[path = "firewallrule_tests.rs"]
mod firewallrule_tests;
