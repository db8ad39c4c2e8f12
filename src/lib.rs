// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # lbops - Load Balancer Operators for Kubernetes
//!
//! lbops runs the load balancer control plane of a private cloud region as
//! three roles of one binary:
//!
//! - **replicator** - Mirrors LoadBalancers from the Compute API Server into
//!   `Loadbalancer` custom resources and pushes their status back upstream
//! - **loadbalancer-operator** - Provisions virtual servers and pools on the
//!   load balancer appliance and creates one `FirewallRule` per listener
//! - **firewall-operator** - Applies `FirewallRule`s through the firewall API
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each role
//! - [`source_cache`] / [`lister_watcher`] - List/watch of the upstream service
//! - [`diff`] - Firewall rule set comparison
//! - [`firewall`] / [`lbprovider`] - Provider clients
//! - [`store`] - Object store seam over the Kubernetes API
//!
//! ## Example
//!
//! ```rust,no_run
//! use lbops::crd::{FirewallRule, FirewallRuleSpec};
//!
//! let rule = FirewallRule::new(
//!     "web-9090",
//!     FirewallRuleSpec {
//!         source_ips: vec!["10.0.0.0/24".to_string()],
//!         destination_ip: "146.152.227.10".to_string(),
//!         port: "9090".to_string(),
//!         protocol: "TCP".to_string(),
//!     },
//! );
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod convert;
pub mod crd;
pub mod diff;
pub mod errors;
pub mod firewall;
pub mod health;
pub mod lbprovider;
pub mod lister_watcher;
pub mod metrics;
pub mod pb;
pub mod reconcilers;
pub mod source;
pub mod source_cache;
pub mod status_reasons;
pub mod store;
pub mod workqueue;

#[cfg(test)]
pub mod testing;
