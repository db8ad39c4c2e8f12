// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer appliance seam.
//!
//! The Loadbalancer operator provisions virtual servers and pools through
//! [`LoadbalancerProvider`]. Every appliance object owned by the operator is
//! named `lbauto-<lb>-<port>`, which makes creation idempotent by name:
//! [`LoadbalancerProvider::get_status`] rediscovers objects created by an
//! earlier pass even when that pass never persisted their ids.
//!
//! [`highwire::HighwireClient`] implements the seam over the appliance REST API.

pub mod highwire;

use crate::constants::PROVIDER_OBJECT_PREFIX;
use crate::crd::{
    FirewallRule, Loadbalancer, LoadbalancerListener, LoadbalancerStatus, PoolStatusMember,
};
use crate::errors::ProviderError;
use crate::status_reasons::{
    MESSAGE_LB_PROVISIONING, MESSAGE_LB_READY, STATE_ACTIVE, STATE_ERROR, STATE_PENDING,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use highwire::HighwireClient;

const VIRTUAL_SERVER_MISSING: &str = "Virtual server was created but missing in provider";
const POOL_MISSING: &str = "Pool was created but missing in provider";

/// How the VIP address of a new virtual server is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VipAddressing {
    /// Allocate a new address.
    Public,
    /// Reuse the primary VIP already assigned to the Loadbalancer.
    Existing,
}

impl VipAddressing {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Existing => "existing",
        }
    }
}

/// Appliance name of the virtual server and pool of one listener.
#[must_use]
pub fn object_name(lb_name: &str, port: i32) -> String {
    format!("{PROVIDER_OBJECT_PREFIX}{lb_name}-{port}")
}

/// Appliance names may carry a partition path (`/Common/lbauto-...`).
fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMember {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub ip: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub connection_limit: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority_group: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ratio: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub monitor_status: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub environment: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_group: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub load_balancing_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub monitor: String,
    #[serde(default)]
    pub min_active_members: i32,
    #[serde(default)]
    pub members: Vec<PoolMember>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServer {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub environment: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub user_group: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_type: String,
    #[serde(default)]
    pub port: i32,
    /// Id of the linked pool, 0 when unlinked.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pool: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persist: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_protocol: String,
}

/// Message shape shown to users in `status.message` on failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMessage {
    pub error_code: i32,
    pub message: String,
}

/// Render an [`OperatorMessage`] as JSON.
#[must_use]
pub fn operator_message(error_code: i32, message: &str) -> String {
    let msg = OperatorMessage {
        error_code,
        message: message.to_string(),
    };
    serde_json::to_string(&msg).unwrap_or_else(|_| message.to_string())
}

/// Fixed explanation of an appliance status code.
#[must_use]
pub fn status_code_message(code: u16) -> &'static str {
    match code {
        400 => "Bad Request: Invalid parameters or incorrect values for env type",
        401 => "Unauthorized: Missing, Expired, or Invalid apiToken",
        403 => "Forbidden: User/User Group does not have access to given object",
        404 => "Not Found: Object or supporting object not found",
        409 => {
            "Conflict: Object already exists with name/ip/... \
             or object is in use by another object"
        }
        _ => "Error Occured",
    }
}

#[derive(Deserialize)]
struct Issue {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct Issues {
    #[serde(default)]
    messages: Vec<Issue>,
}

/// Detail messages from an appliance error body, empty when it has none.
#[must_use]
pub fn error_reasons(body: &str) -> String {
    serde_json::from_str::<Issues>(body)
        .map(|issues| {
            issues
                .messages
                .into_iter()
                .map(|i| i.message)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default()
}

/// Fold what the appliance reports into the Loadbalancer status.
///
/// Marks the per-listener flags of every object found by name, records ids
/// and the primary VIP, and moves a listener to `Error` when an object it
/// recorded as created is gone. Flags never go back to false.
pub fn apply_appliance_state(
    lb_name: &str,
    ports: &[i32],
    status: &mut LoadbalancerStatus,
    servers: &[VirtualServer],
    pools: &[Pool],
    firewall_rules: &[FirewallRule],
) {
    for &port in ports {
        status.seed_listener(port);
        let name = object_name(lb_name, port);
        let server = servers.iter().find(|vs| base_name(&vs.name) == name);
        let pool = pools.iter().find(|p| base_name(&p.name) == name);

        if status.vip.is_empty() {
            if let Some(vs) = server.filter(|vs| !vs.ip.is_empty()) {
                status.vip.clone_from(&vs.ip);
            }
        }

        let Some(conditions) = status.listener_conditions_mut(port) else {
            continue;
        };
        let mut missing = None;
        match server {
            Some(_) => conditions.vip_created = true,
            None if conditions.vip_created => missing = Some(VIRTUAL_SERVER_MISSING),
            None => {}
        }
        match pool {
            Some(_) => conditions.pool_created = true,
            None if conditions.pool_created => missing = missing.or(Some(POOL_MISSING)),
            None => {}
        }
        if let (Some(vs), Some(p)) = (server, pool) {
            if vs.pool != 0 && vs.pool == p.id {
                conditions.vip_pool_linked = true;
            }
        }
        let ready = conditions.vip_created && conditions.pool_created && conditions.vip_pool_linked;

        let Some(listener) = status.listener_mut(port) else {
            continue;
        };
        listener.name.clone_from(&name);
        if let Some(vs) = server {
            listener.vip_id = vs.id;
        }
        if let Some(p) = pool {
            listener.pool_id = p.id;
        }
        if let Some(message) = missing {
            listener.state = STATE_ERROR.to_string();
            listener.message = operator_message(404, message);
        } else if ready {
            listener.state = STATE_ACTIVE.to_string();
            listener.message = MESSAGE_LB_READY.to_string();
        } else {
            listener.state = STATE_PENDING.to_string();
            listener.message = MESSAGE_LB_PROVISIONING.to_string();
        }
    }

    status.conditions.firewall_rule_created = !ports.is_empty()
        && ports.iter().all(|port| {
            let port = port.to_string();
            firewall_rules.iter().any(|rule| rule.spec.port == port)
        });
}

#[async_trait]
pub trait LoadbalancerProvider: Send + Sync {
    /// Refresh listener flags, appliance ids and the primary VIP of `lb`.
    async fn get_status(
        &self,
        lb: &mut Loadbalancer,
        firewall_rules: &[FirewallRule],
    ) -> Result<(), ProviderError>;

    async fn create_virtual_server(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        addressing: VipAddressing,
    ) -> Result<(), ProviderError>;

    async fn create_pool(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        members: &[PoolStatusMember],
    ) -> Result<(), ProviderError>;

    async fn link_vs_to_pool(&self, vip_id: i32, pool_id: i32) -> Result<(), ProviderError>;

    /// Replace the pool membership when it differs from `members`.
    ///
    /// Returns `true` when the appliance was updated.
    async fn observe_current_and_reconcile(
        &self,
        listener: &LoadbalancerListener,
        pool_id: i32,
        members: &[PoolStatusMember],
    ) -> Result<bool, ProviderError>;

    /// Delete the appliance objects of listeners no longer in `listeners`.
    ///
    /// Returns the ports that were removed.
    async fn reconcile_listeners(
        &self,
        lb_name: &str,
        vip: &str,
        listeners: &[LoadbalancerListener],
    ) -> Result<BTreeSet<i32>, ProviderError>;

    /// Delete every virtual server and pool of `lb`.
    async fn process_finalizers(&self, lb: &Loadbalancer) -> Result<(), ProviderError>;
}
