// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP client for the load balancer appliance API.
//!
//! Requests carry the session token as the `apiToken` query parameter. The
//! token comes from `POST login` and is reused until ten minutes before the
//! session expires; the async mutex makes concurrent reconciles share one
//! login. A session shorter than that window is never reused, so every
//! request logs in again.

use super::{
    apply_appliance_state, base_name, error_reasons, object_name, operator_message,
    status_code_message, LoadbalancerProvider, Pool, PoolMember, VipAddressing, VirtualServer,
};
use crate::constants::{PROVIDER_OBJECT_PREFIX, TOKEN_EXPIRY_BUFFER};
use crate::crd::{FirewallRule, Loadbalancer, LoadbalancerListener, PoolStatusMember};
use crate::errors::ProviderError;
use crate::reconcilers::retry::{http_backoff, retry_with_backoff};
use crate::status_reasons::STATE_DELETED;
use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use url::Url;

const LOGIN: &str = "login";
const VIRTUAL_SERVERS: &str = "ltm/virtualServers";
const POOLS: &str = "ltm/pools";

#[derive(Serialize)]
struct Credentials<'a> {
    domain: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    api_token: Option<String>,
    /// Session lifetime in seconds.
    #[serde(default)]
    session_expires: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualServerList {
    #[serde(default)]
    virtual_servers: Vec<VirtualServer>,
}

#[derive(Deserialize)]
struct PoolList {
    #[serde(default)]
    pools: Vec<Pool>,
}

/// Body of a membership update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolUpdate<'a> {
    description: String,
    load_balancing_mode: &'a str,
    monitor: &'a str,
    min_active_members: i32,
    members: Vec<PoolMember>,
}

struct Session {
    token: String,
    expires_at: Instant,
}

impl Session {
    fn is_valid(&self) -> bool {
        Instant::now()
            .checked_add(TOKEN_EXPIRY_BUFFER)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

/// Appliance client for one domain, environment and user group.
pub struct HighwireClient {
    http: HttpClient,
    base_url: Url,
    domain: String,
    username: String,
    password: String,
    environment: i32,
    user_group: i32,
    session: Mutex<Option<Session>>,
}

impl HighwireClient {
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidConfig`] for an unparsable base URL or
    /// when the HTTP client cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: &str,
        domain: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        environment: i32,
        user_group: i32,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&base_url).map_err(|e| {
            ProviderError::InvalidConfig(format!("invalid provider URL {base_url}: {e}"))
        })?;
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfig(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            base_url,
            domain: domain.into(),
            username: username.into(),
            password: password.into(),
            environment,
            user_group,
            session: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid path {path}: {e}")))
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, String), ProviderError> {
        let http_error = |source| ProviderError::Http {
            operation: operation.to_string(),
            source,
        };
        let response = request.send().await.map_err(http_error)?;
        let status = response.status();
        let body = response.text().await.map_err(http_error)?;
        Ok((status, body))
    }

    /// Session token, logging in when there is none or it is about to expire.
    async fn token(&self) -> Result<String, ProviderError> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref().filter(|s| s.is_valid()) {
            debug!("Appliance session is valid, reusing token");
            return Ok(current.token.clone());
        }

        let request = self.http.post(self.endpoint(LOGIN)?).json(&Credentials {
            domain: &self.domain,
            username: &self.username,
            password: &self.password,
        });
        let (status, body) = self.send("login", request).await?;
        if !status.is_success() {
            error!(status = status.as_u16(), "Appliance login failed");
            return Err(ProviderError::Login(status_code_message(status.as_u16()).to_string()));
        }
        let response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Login(format!("malformed login response: {e}")))?;
        let token = response
            .api_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Login("login response carries no apiToken".to_string()))?;

        let lifetime = response
            .session_expires
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
        if lifetime.is_none() {
            info!("Login response has no session expiry, token will not be reused");
        }
        let now = Instant::now();
        *session = Some(Session {
            token: token.clone(),
            expires_at: lifetime.and_then(|l| now.checked_add(l)).unwrap_or(now),
        });
        Ok(token)
    }

    /// Send an authenticated request, failing on statuses outside `accept`.
    ///
    /// Reads are retried on transport errors and 429/5xx responses; writes
    /// are sent once.
    async fn call(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        accept: fn(StatusCode) -> bool,
    ) -> Result<(StatusCode, String), ProviderError> {
        if method != Method::GET {
            return self.call_once(operation, method, path, body, accept).await;
        }
        retry_with_backoff(http_backoff(), operation, ProviderError::is_retryable, || {
            self.call_once(operation, Method::GET, path, None, accept)
        })
        .await
    }

    async fn call_once(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        accept: fn(StatusCode) -> bool,
    ) -> Result<(StatusCode, String), ProviderError> {
        let token = self.token().await?;
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("apiToken", &token);
        if method == Method::GET {
            url.query_pairs_mut()
                .append_pair("environment", &self.environment.to_string());
        }

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let (status, text) = self.send(operation, request).await?;
        if accept(status) {
            return Ok((status, text));
        }

        let code = status.as_u16();
        let reasons = error_reasons(&text);
        let detail = if reasons.is_empty() {
            status_code_message(code).to_string()
        } else {
            format!("{}: {reasons}", status_code_message(code))
        };
        error!(operation = operation, status = code, response = %text, "Appliance request failed");
        Err(ProviderError::Status {
            operation: operation.to_string(),
            status: code,
            message: operator_message(i32::from(code), &detail),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(
        operation: &str,
        body: &str,
    ) -> Result<T, ProviderError> {
        serde_json::from_str(body).map_err(|e| ProviderError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }

    async fn virtual_servers(&self) -> Result<Vec<VirtualServer>, ProviderError> {
        let (_, body) = self
            .call("list virtual servers", Method::GET, VIRTUAL_SERVERS, None, |s| s.is_success())
            .await?;
        Ok(Self::decode::<VirtualServerList>("list virtual servers", &body)?.virtual_servers)
    }

    async fn pools(&self) -> Result<Vec<Pool>, ProviderError> {
        let (_, body) = self
            .call("list pools", Method::GET, POOLS, None, |s| s.is_success())
            .await?;
        Ok(Self::decode::<PoolList>("list pools", &body)?.pools)
    }

    /// Delete one object; an object already gone counts as deleted.
    async fn delete(&self, operation: &str, path: &str) -> Result<(), ProviderError> {
        self.call(operation, Method::DELETE, path, None, |s| {
            s == StatusCode::NO_CONTENT || s == StatusCode::NOT_FOUND
        })
        .await?;
        info!("{} succeeded", operation);
        Ok(())
    }

    async fn delete_listener_objects(
        &self,
        vip_id: i32,
        pool_id: i32,
    ) -> Result<(), ProviderError> {
        if vip_id != 0 {
            self.delete(
                &format!("delete virtual server {vip_id}"),
                &format!("{VIRTUAL_SERVERS}/{vip_id}"),
            )
            .await?;
        }
        if pool_id != 0 {
            self.delete(&format!("delete pool {pool_id}"), &format!("{POOLS}/{pool_id}"))
                .await?;
        }
        Ok(())
    }

    fn members(listener: &LoadbalancerListener, members: &[PoolStatusMember]) -> Vec<PoolMember> {
        members
            .iter()
            .map(|m| PoolMember {
                ip: m.ip_address.clone(),
                port: listener.pool.port.to_string(),
                ..Default::default()
            })
            .collect()
    }
}

#[async_trait]
impl LoadbalancerProvider for HighwireClient {
    async fn get_status(
        &self,
        lb: &mut Loadbalancer,
        firewall_rules: &[FirewallRule],
    ) -> Result<(), ProviderError> {
        let servers = self.virtual_servers().await?;
        let pools = self.pools().await?;
        let name = lb.name_any();
        let ports: Vec<i32> = lb.spec.listeners.iter().map(|l| l.vip.port).collect();
        let status = lb.status.get_or_insert_with(Default::default);
        apply_appliance_state(&name, &ports, status, &servers, &pools, firewall_rules);
        Ok(())
    }

    async fn create_virtual_server(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        addressing: VipAddressing,
    ) -> Result<(), ProviderError> {
        let ip = match addressing {
            VipAddressing::Existing => {
                lb.status.as_ref().map(|s| s.vip.clone()).unwrap_or_default()
            }
            VipAddressing::Public => String::new(),
        };
        let server = VirtualServer {
            ip,
            environment: self.environment,
            user_group: self.user_group,
            name: object_name(&lb.name_any(), listener.vip.port),
            description: format!(
                "Created by lbops for {}/{}",
                lb.namespace().unwrap_or_default(),
                lb.name_any()
            ),
            ip_type: addressing.as_str().to_string(),
            port: listener.vip.port,
            persist: listener.vip.persist.clone(),
            ip_protocol: listener.vip.ip_protocol.clone(),
            ..Default::default()
        };
        info!(name = %server.name, ip_type = %server.ip_type, "Creating virtual server");
        let body = serde_json::to_value(&server).map_err(|e| ProviderError::Decode {
            operation: "create virtual server".to_string(),
            reason: e.to_string(),
        })?;
        self.call("create virtual server", Method::POST, VIRTUAL_SERVERS, Some(body), |s| {
            s.is_success()
        })
        .await?;
        Ok(())
    }

    async fn create_pool(
        &self,
        lb: &Loadbalancer,
        listener: &LoadbalancerListener,
        members: &[PoolStatusMember],
    ) -> Result<(), ProviderError> {
        let pool = Pool {
            environment: self.environment,
            user_group: self.user_group,
            name: object_name(&lb.name_any(), listener.vip.port),
            description: format!(
                "Created by lbops for {}/{}",
                lb.namespace().unwrap_or_default(),
                lb.name_any()
            ),
            load_balancing_mode: listener.pool.load_balancing_mode.clone(),
            monitor: listener.pool.monitor.clone(),
            min_active_members: listener.pool.min_active_members,
            members: Self::members(listener, members),
            ..Default::default()
        };
        info!(name = %pool.name, members = pool.members.len(), "Creating pool");
        let body = serde_json::to_value(&pool).map_err(|e| ProviderError::Decode {
            operation: "create pool".to_string(),
            reason: e.to_string(),
        })?;
        self.call("create pool", Method::POST, POOLS, Some(body), |s| s.is_success())
            .await?;
        Ok(())
    }

    async fn link_vs_to_pool(&self, vip_id: i32, pool_id: i32) -> Result<(), ProviderError> {
        info!(vip_id = vip_id, pool_id = pool_id, "Linking virtual server to pool");
        self.call(
            "link virtual server to pool",
            Method::PUT,
            &format!("{VIRTUAL_SERVERS}/{vip_id}"),
            Some(json!({ "pool": pool_id })),
            |s| s.is_success(),
        )
        .await?;
        Ok(())
    }

    async fn observe_current_and_reconcile(
        &self,
        listener: &LoadbalancerListener,
        pool_id: i32,
        members: &[PoolStatusMember],
    ) -> Result<bool, ProviderError> {
        let (_, body) = self
            .call(
                "get pool members",
                Method::GET,
                &format!("{POOLS}/{pool_id}/members"),
                None,
                |s| s.is_success(),
            )
            .await?;
        let current: Pool = Self::decode("get pool members", &body)?;

        let current_ips: HashSet<&str> = current.members.iter().map(|m| m.ip.as_str()).collect();
        let desired_ips: HashSet<&str> = members.iter().map(|m| m.ip_address.as_str()).collect();
        if current.members.len() == members.len() && current_ips == desired_ips {
            debug!(pool_id = pool_id, "Pool membership is up to date");
            return Ok(false);
        }

        let update = PoolUpdate {
            description: current.description.clone(),
            load_balancing_mode: &listener.pool.load_balancing_mode,
            monitor: &listener.pool.monitor,
            min_active_members: listener.pool.min_active_members,
            members: Self::members(listener, members),
        };
        info!(
            pool_id = pool_id,
            current = ?current_ips,
            desired = ?desired_ips,
            "Updating pool members"
        );
        let body = serde_json::to_value(&update).map_err(|e| ProviderError::Decode {
            operation: "update pool members".to_string(),
            reason: e.to_string(),
        })?;
        self.call(
            "update pool members",
            Method::PUT,
            &format!("{POOLS}/{pool_id}"),
            Some(body),
            |s| s.is_success(),
        )
        .await?;
        Ok(true)
    }

    async fn reconcile_listeners(
        &self,
        lb_name: &str,
        vip: &str,
        listeners: &[LoadbalancerListener],
    ) -> Result<BTreeSet<i32>, ProviderError> {
        let prefix = format!("{PROVIDER_OBJECT_PREFIX}{lb_name}-");
        let wanted: HashSet<i32> = listeners.iter().map(|l| l.vip.port).collect();
        let mut removed = BTreeSet::new();

        for server in self.virtual_servers().await? {
            let Some(port) = base_name(&server.name)
                .strip_prefix(&prefix)
                .and_then(|p| p.parse::<i32>().ok())
            else {
                continue;
            };
            if wanted.contains(&port) || (!vip.is_empty() && server.ip != vip) {
                continue;
            }
            info!(lb = %lb_name, port = port, "Removing listener no longer in spec");
            self.delete_listener_objects(server.id, server.pool).await?;
            removed.insert(port);
        }
        Ok(removed)
    }

    async fn process_finalizers(&self, lb: &Loadbalancer) -> Result<(), ProviderError> {
        let Some(status) = lb.status.as_ref() else {
            return Ok(());
        };
        if status.state == STATE_DELETED {
            return Ok(());
        }

        let mut failure = None;
        for listener in &status.listeners {
            if let Err(e) = self
                .delete_listener_objects(listener.vip_id, listener.pool_id)
                .await
            {
                error!(port = listener.port, error = %e, "Failed to delete listener objects");
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[path = "highwire_tests.rs"]
mod highwire_tests;
