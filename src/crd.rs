// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for load balancer and firewall management.
//!
//! # Resource Types
//!
//! ## Owned by the operators
//!
//! - [`Loadbalancer`] - A tenant load balancer: listeners (VIP + pool) and the
//!   source addresses allowed to reach them. Replicated from the Compute API
//!   Server into the namespace named after the cloud account.
//! - [`FirewallRule`] - One firewall opening towards a VIP port. Created by the
//!   Loadbalancer operator, applied by the FirewallRule operator.
//!
//! ## External
//!
//! - [`Instance`] - A compute instance managed by another controller. The
//!   Loadbalancer operator only reads it and places its finalizer on pool members.
//!
//! # Example: A Loadbalancer with a selector pool
//!
//! ```rust,no_run
//! use lbops::crd::{LoadbalancerListener, LoadbalancerSpec, PoolSpec, VipSpec};
//! use std::collections::BTreeMap;
//!
//! let mut selectors = BTreeMap::new();
//! selectors.insert("external-lb".to_string(), "true".to_string());
//!
//! let spec = LoadbalancerSpec {
//!     listeners: vec![LoadbalancerListener {
//!         vip: VipSpec { port: 9090, ..Default::default() },
//!         pool: PoolSpec {
//!             port: 8080,
//!             instance_selectors: selectors,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard Kubernetes condition.
///
/// Conditions express the state of a resource in a form that tooling
/// (`kubectl wait`, dashboards) understands.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: Reconciling, Ready, Terminated, Running.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// Loadbalancer
// ============================================================================

/// Virtual server (VIP) side of a listener.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VipSpec {
    /// Port exposed on the VIP. Identifies the listener.
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Address type requested for the VIP (e.g. "public", "private").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_type: String,

    /// IP protocol of the virtual server (e.g. "tcp").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_protocol: String,

    /// Persistence profile applied by the appliance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persist: String,
}

/// Reference to an instance that is a static pool member.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolMemberRef {
    /// Name of the `Instance` in the Loadbalancer namespace.
    pub instance_resource_id: String,
}

/// Pool side of a listener.
///
/// Exactly one of `members` (static) or `instanceSelectors` (label match)
/// selects the pool members; specifying neither is a configuration error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    /// Port the members listen on.
    pub port: i32,

    /// Health monitor name (e.g. "tcp", "http").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub monitor: String,

    /// Balancing algorithm (e.g. "roundRobin", "leastConnectionsMember").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub load_balancing_mode: String,

    /// Minimum number of members the appliance keeps active.
    #[serde(default)]
    pub min_active_members: i32,

    /// Instances whose `spec.labels` contain every key with the exact value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instance_selectors: BTreeMap<String, String>,

    /// Static list of member instances.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<PoolMemberRef>,
}

/// One listener: a VIP port forwarding to a pool.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadbalancerListener {
    pub vip: VipSpec,
    pub pool: PoolSpec,

    /// Owner of the listener, informational.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
}

/// Source addresses allowed to reach the VIP.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadbalancerSecurity {
    #[serde(default)]
    pub sourceips: Vec<String>,
}

/// `Loadbalancer` represents a tenant load balancer.
///
/// The namespace is the cloud account id and the name is the resource id
/// assigned by the Compute API Server.
///
/// # Example
///
/// ```yaml
/// apiVersion: private.cloud.io/v1alpha1
/// kind: Loadbalancer
/// metadata:
///   name: 5c9b2c8e-0d5f-4bb4-9a5e-6f0e1d2c3b4a
///   namespace: "123456789123"
/// spec:
///   listeners:
///     - vip:
///         port: 9090
///       pool:
///         port: 8080
///         monitor: tcp
///         loadBalancingMode: roundRobin
///         instanceSelectors:
///           external-lb: "true"
///   security:
///     sourceips: ["10.0.0.0/24"]
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "private.cloud.io",
    version = "v1alpha1",
    kind = "Loadbalancer",
    namespaced,
    shortname = "lb",
    doc = "Tenant load balancer: listeners forwarding a VIP port to a pool of instances."
)]
#[kube(status = "LoadbalancerStatus")]
#[kube(derive = "PartialEq")]
#[kube(derive = "Default")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"VIP","type":"string","jsonPath":".status.vip"}"#)]
#[serde(rename_all = "camelCase")]
pub struct LoadbalancerSpec {
    #[serde(default)]
    pub listeners: Vec<LoadbalancerListener>,

    #[serde(default)]
    pub security: LoadbalancerSecurity,

    /// User labels replicated from the Compute API Server.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Per-listener provisioning flags.
///
/// Within one reconcile pass a flag only moves from false to true.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsListenerStatus {
    pub port: i32,
    #[serde(default)]
    pub pool_created: bool,
    #[serde(default)]
    pub vip_created: bool,
    #[serde(default)]
    pub vip_pool_linked: bool,
}

/// Aggregated provisioning flags of a Loadbalancer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadbalancerConditions {
    #[serde(default)]
    pub listeners: Vec<ConditionsListenerStatus>,
    #[serde(default)]
    pub firewall_rule_created: bool,
}

/// A pool member as placed on the appliance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatusMember {
    /// Name of the member `Instance`.
    pub instance_ref: String,
    pub ip_address: String,
}

/// Observed state of one listener.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub port: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Appliance id of the virtual server, 0 when not created.
    #[serde(default, rename = "vipID")]
    pub vip_id: i32,

    /// Appliance id of the pool, 0 when not created.
    #[serde(default, rename = "poolID")]
    pub pool_id: i32,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub pool_members: Vec<PoolStatusMember>,
}

/// `Loadbalancer` status, replicated back to the Compute API Server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadbalancerStatus {
    #[serde(default)]
    pub conditions: LoadbalancerConditions,

    #[serde(default)]
    pub listeners: Vec<ListenerStatus>,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub message: String,

    /// Primary VIP address, empty until the first virtual server exists.
    #[serde(default)]
    pub vip: String,
}

impl LoadbalancerStatus {
    /// Make sure a condition entry and a status entry exist for `port`.
    pub fn seed_listener(&mut self, port: i32) {
        if !self.conditions.listeners.iter().any(|l| l.port == port) {
            self.conditions.listeners.push(ConditionsListenerStatus {
                port,
                ..Default::default()
            });
        }
        if !self.listeners.iter().any(|l| l.port == port) {
            self.listeners.push(ListenerStatus {
                port,
                ..Default::default()
            });
        }
    }

    #[must_use]
    pub fn listener_conditions(&self, port: i32) -> Option<&ConditionsListenerStatus> {
        self.conditions.listeners.iter().find(|l| l.port == port)
    }

    pub fn listener_conditions_mut(&mut self, port: i32) -> Option<&mut ConditionsListenerStatus> {
        self.conditions.listeners.iter_mut().find(|l| l.port == port)
    }

    #[must_use]
    pub fn listener(&self, port: i32) -> Option<&ListenerStatus> {
        self.listeners.iter().find(|l| l.port == port)
    }

    pub fn listener_mut(&mut self, port: i32) -> Option<&mut ListenerStatus> {
        self.listeners.iter_mut().find(|l| l.port == port)
    }
}

// ============================================================================
// FirewallRule
// ============================================================================

/// `FirewallRule` opens `protocol/port` on `destinationIP` for a set of sources.
///
/// # Example
///
/// ```yaml
/// apiVersion: private.cloud.io/v1alpha1
/// kind: FirewallRule
/// metadata:
///   name: my-lb-9090
///   namespace: "123456789123"
/// spec:
///   sourceIPs: ["10.0.0.0/24", "134.134.137.85"]
///   destinationIP: 146.152.227.10
///   port: "9090"
///   protocol: TCP
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "private.cloud.io",
    version = "v1alpha1",
    kind = "FirewallRule",
    namespaced,
    shortname = "fwr",
    doc = "FirewallRule opens a protocol/port on a destination VIP for a set of source addresses."
)]
#[kube(status = "FirewallRuleStatus")]
#[kube(derive = "PartialEq")]
#[kube(derive = "Default")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Destination","type":"string","jsonPath":".spec.destinationIP"}"#)]
#[kube(printcolumn = r#"{"name":"Port","type":"string","jsonPath":".spec.port"}"#)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleSpec {
    #[serde(rename = "sourceIPs", default)]
    pub source_ips: Vec<String>,

    #[serde(rename = "destinationIP")]
    pub destination_ip: String,

    pub port: String,

    pub protocol: String,
}

/// `FirewallRule` status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Instance (external)
// ============================================================================

/// Network interface of an instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInterfaceStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// `Instance` status fields read by the Loadbalancer operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub interfaces: Vec<InstanceInterfaceStatus>,
}

/// `Instance` is owned by the compute controllers. Only the fields needed for
/// pool membership are modelled; unknown fields are ignored on read.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "private.cloud.io",
    version = "v1alpha1",
    kind = "Instance",
    namespaced,
    doc = "Instance is a compute instance that can be a load balancer pool member."
)]
#[kube(status = "InstanceStatus")]
#[kube(derive = "PartialEq")]
#[kube(derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}
