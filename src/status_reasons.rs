// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lifecycle states, condition types and condition reasons for lbops resources.
//!
//! # Condition Types
//!
//! `FirewallRule` resources carry three conditions that the Loadbalancer
//! operator and status consumers rely on:
//!
//! - `Reconciling` - the operator is currently applying the rule
//! - `Ready` - the rule is applied on the firewall
//! - `Terminated` - the rule has been removed from the firewall; the parent
//!   Loadbalancer waits for this before releasing its finalizer
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   state: Active
//!   message: Rule is ready
//!   conditions:
//!     - type: Reconciling
//!       status: "False"
//!       reason: Reconciled
//!     - type: Ready
//!       status: "True"
//!       reason: RuleApplied
//!     - type: Terminated
//!       status: "False"
//!       reason: RuleApplied
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Condition type set while a reconcile pass is applying changes
pub const CONDITION_RECONCILING: &str = "Reconciling";

/// Condition type set when the resource has converged
pub const CONDITION_READY: &str = "Ready";

/// Condition type set once a firewall rule is gone from the firewall
pub const CONDITION_TERMINATED: &str = "Terminated";

/// Condition type on `Instance` resources marking a running machine
pub const CONDITION_INSTANCE_RUNNING: &str = "Running";

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition status `True`
pub const STATUS_TRUE: &str = "True";

/// Condition status `False`
pub const STATUS_FALSE: &str = "False";

/// Condition status `Unknown`
pub const STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// Lifecycle States
// ============================================================================

/// Resource accepted, provisioning has not finished
pub const STATE_PENDING: &str = "Pending";

/// Operator is applying the resource
pub const STATE_RECONCILING: &str = "Reconciling";

/// Resource fully provisioned
pub const STATE_ACTIVE: &str = "Active";

/// Resource is being torn down
pub const STATE_DELETING: &str = "Deleting";

/// Resource fully torn down, only the finalizer remains
pub const STATE_DELETED: &str = "Deleted";

/// Provider state diverged from what the status recorded
pub const STATE_ERROR: &str = "Error";

// ============================================================================
// Condition Reasons
// ============================================================================

/// Reconcile pass started
pub const REASON_RECONCILING: &str = "Reconciling";

/// Reconcile pass finished without changes pending
pub const REASON_RECONCILED: &str = "Reconciled";

/// Rule is present on the firewall
pub const REASON_RULE_APPLIED: &str = "RuleApplied";

/// Rule could not be applied
pub const REASON_RULE_SYNC_FAILED: &str = "RuleSyncFailed";

/// Rule removal from the firewall started
pub const REASON_RULE_DELETING: &str = "RuleDeleting";

/// Rule removed from the firewall
pub const REASON_RULE_REMOVED: &str = "RuleRemoved";

// ============================================================================
// Status Messages
// ============================================================================

/// FirewallRule message while the rule is being applied
pub const MESSAGE_RULE_RECONCILING: &str = "Rule is reconciling";

/// FirewallRule message once the rule is applied
pub const MESSAGE_RULE_READY: &str = "Rule is ready";

/// FirewallRule message while the rule is removed
pub const MESSAGE_RULE_DELETING: &str = "Rule is being deleted";

/// FirewallRule message after the rule was removed
pub const MESSAGE_RULE_DELETED: &str = "Rule deleted";

/// Loadbalancer message when deletion starts
pub const MESSAGE_LB_DELETING: &str = "Deleting listeners and firewall rules";

/// Loadbalancer message while child rules are still terminating
pub const MESSAGE_LB_REMOVING_FIREWALL_RULES: &str = "Removing firewall rules";

/// Loadbalancer message after deletion completed
pub const MESSAGE_LB_DELETED: &str = "Load balancer successfully deleted";

/// Listener message when no instance matched the pool
pub const MESSAGE_NO_INSTANCES: &str = "No instances assigned to listener";

/// Loadbalancer message while provisioning
pub const MESSAGE_LB_PROVISIONING: &str = "Provisioning load balancer";

/// Loadbalancer message once every listener is linked
pub const MESSAGE_LB_READY: &str = "Load balancer ready";
