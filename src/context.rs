// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared contexts handed to the operator controllers.
//!
//! Each controller receives an `Arc` of its context. Stores and providers are
//! trait objects so the same reconcilers run against the Kubernetes API and
//! real appliances in production, and against in-memory fakes in tests.

use crate::crd::{FirewallRule, Instance, Loadbalancer};
use crate::firewall::FirewallProvider;
use crate::lbprovider::LoadbalancerProvider;
use crate::store::{KubeStore, ObjectStore};
use kube::Client;
use std::sync::Arc;

/// Context of the FirewallRule operator.
#[derive(Clone)]
pub struct FirewallContext {
    /// FirewallRule store
    pub rules: Arc<dyn ObjectStore<FirewallRule>>,

    /// Firewall rule API
    pub provider: Arc<dyn FirewallProvider>,
}

impl FirewallContext {
    #[must_use]
    pub fn new(client: Client, provider: Arc<dyn FirewallProvider>) -> Self {
        Self {
            rules: Arc::new(KubeStore::new(client)),
            provider,
        }
    }
}

/// Context of the Loadbalancer operator.
#[derive(Clone)]
pub struct LoadbalancerContext {
    pub loadbalancers: Arc<dyn ObjectStore<Loadbalancer>>,

    /// Child FirewallRules
    pub firewall_rules: Arc<dyn ObjectStore<FirewallRule>>,

    /// Pool member candidates (read, plus finalizer writes)
    pub instances: Arc<dyn ObjectStore<Instance>>,

    /// Load balancer appliance
    pub provider: Arc<dyn LoadbalancerProvider>,
}

impl LoadbalancerContext {
    #[must_use]
    pub fn new(client: Client, provider: Arc<dyn LoadbalancerProvider>) -> Self {
        Self {
            loadbalancers: Arc::new(KubeStore::new(client.clone())),
            firewall_rules: Arc::new(KubeStore::new(client.clone())),
            instances: Arc::new(KubeStore::new(client)),
            provider,
        }
    }
}
