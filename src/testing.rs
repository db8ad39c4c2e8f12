// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for unit tests.

use crate::constants::*;
use crate::context::LoadbalancerContext;
use crate::crd::{
    Condition, FirewallRule, FirewallRuleSpec, Instance, InstanceInterfaceStatus, InstanceSpec,
    InstanceStatus, Loadbalancer, LoadbalancerListener, LoadbalancerSecurity, LoadbalancerSpec,
    LoadbalancerStatus, PoolSpec, PoolStatusMember, VipSpec,
};
use crate::diff::Rule;
use crate::errors::{FirewallError, ProviderError};
use crate::firewall::FirewallProvider;
use crate::lbprovider::{
    apply_appliance_state, object_name, operator_message, LoadbalancerProvider, Pool, PoolMember,
    VipAddressing, VirtualServer,
};
use crate::pb::{
    LoadBalancerListener as PbListener, LoadBalancerMetadataPrivate, LoadBalancerPool,
    LoadBalancerPrivate, LoadBalancerRemoveFinalizerRequest, LoadBalancerSearchStreamPrivateRequest,
    LoadBalancerSecurity as PbSecurity, LoadBalancerSpecPrivate, LoadBalancerUpdateStatusRequest,
    LoadBalancerWatchRequest, LoadBalancerWatchResponse, WatchDeltaType,
};
use crate::source::{DeltaStream, LoadBalancerSource};
use crate::store::memory::MemoryStore;
use crate::status_reasons::{CONDITION_INSTANCE_RUNNING, STATUS_FALSE, STATUS_TRUE};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use k8s_openapi::jiff::Timestamp;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const ACCOUNT: &str = "123456789123";
pub const OTHER_ACCOUNT: &str = "222222222222";

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn deletion_timestamp() -> Time {
    Time(Timestamp::now())
}

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(
        kube::core::Status::failure(&format!("{reason}: injected"), reason)
            .with_code(code)
            .boxed(),
    )
}

/// Selector-pool listener on `port` forwarding to 8080.
pub fn selector_listener(port: i32, selectors: &[(&str, &str)]) -> LoadbalancerListener {
    LoadbalancerListener {
        vip: VipSpec {
            port,
            ip_type: "public".to_string(),
            ip_protocol: "tcp".to_string(),
            ..Default::default()
        },
        pool: PoolSpec {
            port: 8080,
            monitor: "tcp".to_string(),
            load_balancing_mode: "roundRobin".to_string(),
            instance_selectors: labels(selectors),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn loadbalancer(
    namespace: &str,
    name: &str,
    listeners: Vec<LoadbalancerListener>,
) -> Loadbalancer {
    let mut lb = Loadbalancer::new(
        name,
        LoadbalancerSpec {
            listeners,
            security: LoadbalancerSecurity {
                sourceips: vec!["10.0.0.0/24".to_string(), "134.134.137.85".to_string()],
            },
            ..Default::default()
        },
    );
    lb.metadata.namespace = Some(namespace.to_string());
    lb.metadata.uid = Some(format!("uid-{name}"));
    lb
}

pub fn instance(
    namespace: &str,
    name: &str,
    pairs: &[(&str, &str)],
    ip: &str,
    running: bool,
) -> Instance {
    let mut instance = Instance::new(
        name,
        InstanceSpec {
            labels: labels(pairs),
        },
    );
    instance.metadata.namespace = Some(namespace.to_string());
    instance.status = Some(InstanceStatus {
        conditions: vec![Condition {
            r#type: CONDITION_INSTANCE_RUNNING.to_string(),
            status: if running { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
            ..Default::default()
        }],
        interfaces: vec![InstanceInterfaceStatus {
            name: "eth0".to_string(),
            addresses: vec![ip.to_string()],
        }],
    });
    instance
}

pub fn firewall_rule(
    namespace: &str,
    name: &str,
    dest: &str,
    port: &str,
    sources: &[&str],
) -> FirewallRule {
    FirewallRule {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: FirewallRuleSpec {
            source_ips: sources.iter().map(|s| (*s).to_string()).collect(),
            destination_ip: dest.to_string(),
            port: port.to_string(),
            protocol: DEFAULT_FIREWALL_PROTOCOL.to_string(),
        },
        status: None,
    }
}

/// Owner reference marking `lb_name` as the controlling Loadbalancer.
pub fn controller_ref(lb_name: &str) -> OwnerReference {
    OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_LOADBALANCER.to_string(),
        name: lb_name.to_string(),
        uid: format!("uid-{lb_name}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

// ============================================================================
// Source fakes
// ============================================================================

/// Wire LoadBalancer with one selector listener per port.
pub fn lb_message(
    account: &str,
    resource_id: &str,
    resource_version: &str,
    ports: &[i32],
) -> LoadBalancerPrivate {
    LoadBalancerPrivate {
        metadata: Some(LoadBalancerMetadataPrivate {
            cloud_account_id: account.to_string(),
            name: format!("{resource_id}-display"),
            resource_id: resource_id.to_string(),
            resource_version: resource_version.to_string(),
            ..Default::default()
        }),
        spec: Some(LoadBalancerSpecPrivate {
            listeners: ports
                .iter()
                .map(|port| PbListener {
                    port: *port,
                    pool: Some(LoadBalancerPool {
                        port: 8080,
                        monitor: "tcp".to_string(),
                        load_balancing_mode: "roundRobin".to_string(),
                        instance_selectors: HashMap::from([(
                            "external-lb".to_string(),
                            "true".to_string(),
                        )]),
                        instance_resource_ids: vec![],
                    }),
                })
                .collect(),
            security: Some(PbSecurity {
                sourceips: vec!["10.0.0.0/24".to_string()],
            }),
        }),
        status: None,
    }
}

pub fn updated(object: LoadBalancerPrivate) -> LoadBalancerWatchResponse {
    LoadBalancerWatchResponse {
        r#type: WatchDeltaType::Updated as i32,
        object: Some(object),
    }
}

pub fn deleted(object: LoadBalancerPrivate) -> LoadBalancerWatchResponse {
    LoadBalancerWatchResponse {
        r#type: WatchDeltaType::Deleted as i32,
        object: Some(object),
    }
}

pub fn bookmark(resource_version: &str) -> LoadBalancerWatchResponse {
    LoadBalancerWatchResponse {
        r#type: WatchDeltaType::Bookmark as i32,
        object: Some(LoadBalancerPrivate {
            metadata: Some(LoadBalancerMetadataPrivate {
                resource_version: resource_version.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// One scripted server stream.
pub struct Script {
    pub deltas: Vec<Result<LoadBalancerWatchResponse, tonic::Status>>,
    /// Keep the stream open after the scripted deltas instead of ending it.
    pub hang: bool,
}

impl Script {
    pub fn ending(deltas: Vec<LoadBalancerWatchResponse>) -> Self {
        Self {
            deltas: deltas.into_iter().map(Ok).collect(),
            hang: false,
        }
    }

    pub fn hanging(deltas: Vec<LoadBalancerWatchResponse>) -> Self {
        Self {
            deltas: deltas.into_iter().map(Ok).collect(),
            hang: true,
        }
    }

    pub fn failing(deltas: Vec<LoadBalancerWatchResponse>, status: tonic::Status) -> Self {
        let mut deltas: Vec<_> = deltas.into_iter().map(Ok).collect();
        deltas.push(Err(status));
        Self { deltas, hang: false }
    }

    fn into_stream(self) -> DeltaStream {
        let scripted = futures::stream::iter(self.deltas);
        if self.hang {
            scripted.chain(futures::stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }
}

/// Scripted [`LoadBalancerSource`]. Unscripted list/watch calls hang.
#[derive(Default)]
pub struct FakeSource {
    lists: Mutex<VecDeque<Script>>,
    watches: Mutex<VecDeque<Script>>,
    pub list_requests: Mutex<Vec<LoadBalancerSearchStreamPrivateRequest>>,
    pub watch_requests: Mutex<Vec<LoadBalancerWatchRequest>>,
    pub status_updates: Mutex<Vec<LoadBalancerUpdateStatusRequest>>,
    pub finalizer_removals: Mutex<Vec<LoadBalancerRemoveFinalizerRequest>>,
    update_status_error: Mutex<Option<tonic::Code>>,
    remove_finalizer_error: Mutex<Option<tonic::Code>>,
}

impl FakeSource {
    pub fn push_list(&self, script: Script) {
        self.lists.lock().unwrap().push_back(script);
    }

    pub fn push_watch(&self, script: Script) {
        self.watches.lock().unwrap().push_back(script);
    }

    pub fn fail_update_status(&self, code: tonic::Code) {
        *self.update_status_error.lock().unwrap() = Some(code);
    }

    pub fn fail_remove_finalizer(&self, code: tonic::Code) {
        *self.remove_finalizer_error.lock().unwrap() = Some(code);
    }

    pub fn status_update_count(&self) -> usize {
        self.status_updates.lock().unwrap().len()
    }

    pub fn finalizer_removal_count(&self) -> usize {
        self.finalizer_removals.lock().unwrap().len()
    }
}

fn hanging_stream() -> DeltaStream {
    futures::stream::pending().boxed()
}

#[async_trait]
impl LoadBalancerSource for FakeSource {
    async fn search_stream_private(
        &self,
        request: LoadBalancerSearchStreamPrivateRequest,
    ) -> Result<DeltaStream, tonic::Status> {
        self.list_requests.lock().unwrap().push(request);
        let next = self.lists.lock().unwrap().pop_front();
        Ok(next.map_or_else(hanging_stream, Script::into_stream))
    }

    async fn watch(&self, request: LoadBalancerWatchRequest) -> Result<DeltaStream, tonic::Status> {
        self.watch_requests.lock().unwrap().push(request);
        let next = self.watches.lock().unwrap().pop_front();
        Ok(next.map_or_else(hanging_stream, Script::into_stream))
    }

    async fn update_status(
        &self,
        request: LoadBalancerUpdateStatusRequest,
    ) -> Result<(), tonic::Status> {
        self.status_updates.lock().unwrap().push(request);
        match *self.update_status_error.lock().unwrap() {
            Some(code) => Err(tonic::Status::new(code, "injected")),
            None => Ok(()),
        }
    }

    async fn remove_finalizer(
        &self,
        request: LoadBalancerRemoveFinalizerRequest,
    ) -> Result<(), tonic::Status> {
        self.finalizer_removals.lock().unwrap().push(request);
        match *self.remove_finalizer_error.lock().unwrap() {
            Some(code) => Err(tonic::Status::new(code, "injected")),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Provider fakes
// ============================================================================

/// Recording [`FirewallProvider`].
#[derive(Default)]
pub struct FakeFirewall {
    /// Returned by `get_existing_customer_access`.
    pub existing: Mutex<Vec<Rule>>,
    /// Rule names handed to each sync, with the VIP.
    pub syncs: Mutex<Vec<(String, Vec<String>)>>,
    pub removals: Mutex<Vec<String>>,
    sync_error: Mutex<Option<u16>>,
}

impl FakeFirewall {
    /// Make every sync answer with HTTP `status`.
    pub fn fail_sync(&self, status: u16) {
        *self.sync_error.lock().unwrap() = Some(status);
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }

    pub fn last_sync(&self) -> Option<(String, Vec<String>)> {
        self.syncs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl FirewallProvider for FakeFirewall {
    async fn get_existing_customer_access(
        &self,
        _customer_id: &str,
        vip: &str,
    ) -> Result<Vec<Rule>, FirewallError> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.dest_ip == vip)
            .cloned()
            .collect())
    }

    async fn sync_firewall_rules(
        &self,
        desired: &[FirewallRule],
        _existing: &[Rule],
        vip: &str,
        _customer_id: &str,
    ) -> Result<(), FirewallError> {
        if desired.is_empty() {
            return Err(FirewallError::MissingDesiredRules);
        }
        if let Some(status) = *self.sync_error.lock().unwrap() {
            return Err(FirewallError::Status {
                operation: "addaccess".to_string(),
                status,
                body: "injected".to_string(),
            });
        }
        let mut names: Vec<String> = desired.iter().map(|r| r.name_any()).collect();
        names.sort();
        self.syncs.lock().unwrap().push((vip.to_string(), names));
        Ok(())
    }

    async fn remove_access(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        self.removals.lock().unwrap().push(rule.name_any());
        Ok(())
    }
}

/// VIP handed out for [`VipAddressing::Public`].
pub const FAKE_PUBLIC_VIP: &str = "146.152.227.10";

#[derive(Default)]
struct Appliance {
    servers: Vec<VirtualServer>,
    pools: Vec<Pool>,
    next_id: i32,
    calls: Vec<String>,
    failure: Option<(String, u16, String)>,
}

impl Appliance {
    fn allocate(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn call(&mut self, operation: &str) -> Result<(), ProviderError> {
        self.calls.push(operation.to_string());
        match self.failure.take() {
            Some((op, status, message)) if op == operation => Err(ProviderError::Status {
                operation: op,
                status,
                message: operator_message(i32::from(status), &message),
            }),
            other => {
                self.failure = other;
                Ok(())
            }
        }
    }
}

fn owned_port(lb_name: &str, object: &str) -> Option<i32> {
    object.strip_prefix(&format!("{PROVIDER_OBJECT_PREFIX}{lb_name}-"))?.parse().ok()
}

/// In-memory appliance behind [`LoadbalancerProvider`].
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<Appliance>,
}

impl FakeProvider {
    /// Fail the next call of `operation` with HTTP `status`.
    pub fn fail_next(&self, operation: &str, status: u16, message: &str) {
        self.state.lock().unwrap().failure =
            Some((operation.to_string(), status, message.to_string()));
    }

    pub fn servers(&self) -> Vec<VirtualServer> {
        self.state.lock().unwrap().servers.clone()
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.state.lock().unwrap().pools.clone()
    }

    /// Operations in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn to_pool_members(port: i32, members: &[PoolStatusMember]) -> Vec<PoolMember> {
    members
        .iter()
        .map(|m| PoolMember {
            ip: m.ip_address.clone(),
            port: port.to_string(),
            ..Default::default()
        })
        .collect()
}

#[async_trait]
impl LoadbalancerProvider for FakeProvider {
    async fn get_status(
        &self,
        lb: &mut Loadbalancer,
        firewall_rules: &[FirewallRule],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("get_status")?;
        let name = lb.name_any();
        let ports: Vec<i32> = lb.spec.listeners.iter().map(|l| l.vip.port).collect();
        let status = lb.status.get_or_insert_with(LoadbalancerStatus::default);
        apply_appliance_state(&name, &ports, status, &state.servers, &state.pools, firewall_rules);
        Ok(())
    }

    async fn create_virtual_server(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        addressing: VipAddressing,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("create_virtual_server")?;
        let name = object_name(&lb.name_any(), listener.vip.port);
        if state.servers.iter().any(|vs| vs.name == name) {
            return Ok(());
        }
        let ip = match addressing {
            VipAddressing::Existing => {
                lb.status.as_ref().map(|s| s.vip.clone()).unwrap_or_default()
            }
            VipAddressing::Public => FAKE_PUBLIC_VIP.to_string(),
        };
        let id = state.allocate();
        state.servers.push(VirtualServer {
            id,
            ip,
            name,
            port: listener.vip.port,
            ip_type: addressing.as_str().to_string(),
            ip_protocol: listener.vip.ip_protocol.clone(),
            ..Default::default()
        });
        Ok(())
    }

    async fn create_pool(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        members: &[PoolStatusMember],
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("create_pool")?;
        let name = object_name(&lb.name_any(), listener.vip.port);
        if state.pools.iter().any(|p| p.name == name) {
            return Ok(());
        }
        let id = state.allocate();
        state.pools.push(Pool {
            id,
            name,
            load_balancing_mode: listener.pool.load_balancing_mode.clone(),
            monitor: listener.pool.monitor.clone(),
            members: to_pool_members(listener.pool.port, members),
            ..Default::default()
        });
        Ok(())
    }

    async fn link_vs_to_pool(&self, vip_id: i32, pool_id: i32) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("link_vs_to_pool")?;
        match state.servers.iter_mut().find(|vs| vs.id == vip_id) {
            Some(vs) => {
                vs.pool = pool_id;
                Ok(())
            }
            None => Err(ProviderError::Status {
                operation: "link_vs_to_pool".to_string(),
                status: 404,
                message: operator_message(404, "virtual server not found"),
            }),
        }
    }

    async fn observe_current_and_reconcile(
        &self,
        listener: &LoadbalancerListener,
        pool_id: i32,
        members: &[PoolStatusMember],
    ) -> Result<bool, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("observe_current_and_reconcile")?;
        let Some(pool) = state.pools.iter_mut().find(|p| p.id == pool_id) else {
            return Ok(false);
        };
        let mut current: Vec<&str> = pool.members.iter().map(|m| m.ip.as_str()).collect();
        let mut wanted: Vec<&str> = members.iter().map(|m| m.ip_address.as_str()).collect();
        current.sort_unstable();
        wanted.sort_unstable();
        if current == wanted {
            return Ok(false);
        }
        pool.members = to_pool_members(listener.pool.port, members);
        Ok(true)
    }

    async fn reconcile_listeners(
        &self,
        lb_name: &str,
        _vip: &str,
        listeners: &[LoadbalancerListener],
    ) -> Result<BTreeSet<i32>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("reconcile_listeners")?;
        let wanted: BTreeSet<i32> = listeners.iter().map(|l| l.vip.port).collect();
        let stale =
            |name: &str| owned_port(lb_name, name).is_some_and(|port| !wanted.contains(&port));

        let mut removed = BTreeSet::new();
        for vs in state.servers.iter().filter(|vs| stale(&vs.name)) {
            removed.extend(owned_port(lb_name, &vs.name));
        }
        state.servers.retain(|vs| !stale(&vs.name));
        state.pools.retain(|p| !stale(&p.name));
        Ok(removed)
    }

    async fn process_finalizers(&self, lb: &Loadbalancer) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call("process_finalizers")?;
        let name = lb.name_any();
        state.servers.retain(|vs| owned_port(&name, &vs.name).is_none());
        state.pools.retain(|p| owned_port(&name, &p.name).is_none());
        Ok(())
    }
}

/// Loadbalancer operator wired to in-memory stores and [`FakeProvider`].
pub struct OperatorHarness {
    pub loadbalancers: Arc<MemoryStore<Loadbalancer>>,
    pub firewall_rules: Arc<MemoryStore<FirewallRule>>,
    pub instances: Arc<MemoryStore<Instance>>,
    pub provider: Arc<FakeProvider>,
    pub ctx: LoadbalancerContext,
}

impl OperatorHarness {
    pub fn new() -> Self {
        let loadbalancers = Arc::new(MemoryStore::new());
        let firewall_rules = Arc::new(MemoryStore::new());
        let instances = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider::default());
        let ctx = LoadbalancerContext {
            loadbalancers: loadbalancers.clone(),
            firewall_rules: firewall_rules.clone(),
            instances: instances.clone(),
            provider: provider.clone(),
        };
        Self {
            loadbalancers,
            firewall_rules,
            instances,
            provider,
            ctx,
        }
    }

    /// Stored copy of a Loadbalancer in [`ACCOUNT`].
    pub fn lb(&self, name: &str) -> Loadbalancer {
        self.loadbalancers.peek(ACCOUNT, name).unwrap()
    }

    pub fn rule(&self, name: &str) -> Option<FirewallRule> {
        self.firewall_rules.peek(ACCOUNT, name)
    }

    pub fn instance(&self, name: &str) -> Instance {
        self.instances.peek(ACCOUNT, name).unwrap()
    }
}
