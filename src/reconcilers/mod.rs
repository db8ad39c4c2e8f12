// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for the load balancer control plane.
//!
//! # Reconciliation Architecture
//!
//! Every controller follows the same loop:
//!
//! 1. **Observe** - Read the resource and whatever it depends on
//! 2. **Compare** - Work out the single next step towards the desired state
//! 3. **Act** - Perform that step against the target store or a provider
//! 4. **Status** - Persist what was observed, only when it changed
//!
//! # Available Reconcilers
//!
//! - [`LoadBalancerReplicator`] - Mirrors Compute API Server LoadBalancers into
//!   the cluster and pushes their status back upstream
//! - [`reconcile_loadbalancer`] - Provisions virtual servers, pools and child
//!   FirewallRules for a Loadbalancer
//! - [`reconcile_firewall_rule`] - Applies FirewallRules through the firewall API
//!
//! # Shared helpers
//!
//! - [`finalizers`] - Idempotent finalizer add/remove with conflict retry
//! - [`status`] - Conditions and equality-suppressed status writes
//! - [`retry`] - Backoff for API calls and optimistic-concurrency writes

pub mod finalizers;
pub mod firewallrule;
pub mod loadbalancer;
pub mod replicator;
pub mod retry;
pub mod status;

pub use firewallrule::reconcile_firewall_rule;
pub use loadbalancer::{loadbalancers_for_instance, reconcile_loadbalancer};
pub use replicator::LoadBalancerReplicator;
