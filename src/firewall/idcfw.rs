// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP client for the firewall rule API.
//!
//! Every call authenticates with a bearer token obtained from `POST /token`.
//! The token is cached and checked through `GET /validate` before reuse;
//! the async mutex makes concurrent reconciles share one login.

use super::{normalize_region, AccessEntry, Environment, FirewallProvider};
use crate::crd::FirewallRule;
use crate::diff::{self, Rule, RuleKey};
use crate::errors::FirewallError;
use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use url::Url;

const FLOW_ALREADY_ALLOWED: &str = "One or more of the requested flows is already allowed.";
const TOKEN_VALID: &str = "Your token is valid.";
const NO_RULES_MARKERS: [&str; 2] = [
    "No existing firewall rules found for vip",
    "No existing IDCAPI firewall rules found",
];

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct RequestResponse {
    #[serde(default)]
    result: String,
}

#[derive(Deserialize)]
struct CurrentRules {
    #[serde(default)]
    result: Vec<AccessEntry>,
}

/// Body of `POST /api/ports` and `POST /api/removeaccess`.
#[derive(Debug, Serialize)]
struct RulePayload<'a> {
    customer_id: &'a str,
    source_ip: String,
    environment: &'a str,
    region: &'a str,
    dest_ip: &'a str,
    protocol: &'a str,
    port: &'a str,
}

/// `true` when the API answered with its "already allowed" marker.
fn flow_already_allowed(body: &str) -> bool {
    serde_json::from_str::<RequestResponse>(body).is_ok_and(|r| r.result == FLOW_ALREADY_ALLOWED)
}

/// Firewall API client for one environment and region.
#[derive(Debug)]
pub struct IdcFirewallClient {
    http: HttpClient,
    base_url: Url,
    environment: Environment,
    region: String,
    username: String,
    password: String,
    token: Mutex<String>,
}

impl IdcFirewallClient {
    /// # Errors
    ///
    /// Returns [`FirewallError::InvalidConfig`] for an unknown environment or
    /// an unparsable base URL.
    pub fn new(
        http: HttpClient,
        base_url: &str,
        environment: &str,
        region: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, FirewallError> {
        let environment = Environment::parse(environment)?;
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&base_url).map_err(|e| {
            FirewallError::InvalidConfig(format!("invalid firewall URL {base_url}: {e}"))
        })?;
        Ok(Self {
            http,
            base_url,
            environment,
            region: normalize_region(region),
            username: username.into(),
            password: password.into(),
            token: Mutex::new(String::new()),
        })
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn endpoint(&self, path: &str) -> Result<Url, FirewallError> {
        self.base_url
            .join(path)
            .map_err(|e| FirewallError::InvalidConfig(format!("invalid path {path}: {e}")))
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, String), FirewallError> {
        let http_error = |source| FirewallError::Http {
            operation: operation.to_string(),
            source,
        };
        let response = request.send().await.map_err(http_error)?;
        let status = response.status();
        let body = response.text().await.map_err(http_error)?;
        Ok((status, body))
    }

    async fn authorized(
        &self,
        method: Method,
        url: Url,
    ) -> Result<reqwest::RequestBuilder, FirewallError> {
        let token = self.token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    /// Cached token, logging in again when it no longer validates.
    async fn token(&self) -> Result<String, FirewallError> {
        let mut token = self.token.lock().await;
        if !token.is_empty() && self.validate(&token).await? {
            debug!("Firewall token is valid, reusing it");
            return Ok(token.clone());
        }

        let request = self.http.post(self.endpoint("token")?).json(&Credentials {
            username: &self.username,
            password: &self.password,
        });
        let (status, body) = self.send("token", request).await?;
        if status != StatusCode::OK {
            return Err(FirewallError::Auth("invalid credentials".to_string()));
        }
        let response: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| FirewallError::Auth(format!("malformed token response: {e}")))?;
        *token = response.access_token.clone();
        Ok(response.access_token)
    }

    async fn validate(&self, token: &str) -> Result<bool, FirewallError> {
        let request = self.http.get(self.endpoint("validate")?).bearer_auth(token);
        let (status, body) = self.send("validate", request).await?;
        if status != StatusCode::OK {
            return Ok(false);
        }
        Ok(serde_json::from_str::<RequestResponse>(&body).is_ok_and(|r| r.result == TOKEN_VALID))
    }

    /// Applied rules for `vip`; `None` when the API reports none.
    async fn get_access(&self, vip: &str) -> Result<Option<Vec<AccessEntry>>, FirewallError> {
        let mut url = self.endpoint("api/getallaccess")?;
        url.query_pairs_mut()
            .append_pair("environment", self.environment.as_str())
            .append_pair("region", &self.region)
            .append_pair("vip", vip);

        let request = self.authorized(Method::GET, url).await?;
        let (status, body) = self.send("getallaccess", request).await?;
        if status != StatusCode::OK {
            return Err(FirewallError::Status {
                operation: "getallaccess".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if NO_RULES_MARKERS.iter().any(|m| body.contains(m)) {
            return Ok(None);
        }
        let rules: CurrentRules = serde_json::from_str(&body).map_err(|e| FirewallError::Status {
            operation: "getallaccess".to_string(),
            status: status.as_u16(),
            body: format!("malformed response: {e}"),
        })?;
        Ok(Some(rules.result))
    }

    /// Whether the flow is already allowed. Any non-200 answer means it is not.
    async fn rule_exists(&self, sources: &[String], key: &RuleKey) -> Result<bool, FirewallError> {
        let mut url = self.endpoint("api/ports")?;
        url.query_pairs_mut()
            .append_pair("source_ip", &sources.join(","))
            .append_pair("environment", self.environment.as_str())
            .append_pair("region", &self.region)
            .append_pair("dest_ip", &key.dest_ip)
            .append_pair("protocol", &key.protocol)
            .append_pair("port", &key.port);

        let request = self.authorized(Method::GET, url).await?;
        let (status, body) = self.send("ports", request).await?;
        if status != StatusCode::OK {
            return Ok(false);
        }
        Ok(flow_already_allowed(&body))
    }

    fn payload<'a>(&'a self, key: &'a RuleKey, sources: &[String]) -> RulePayload<'a> {
        RulePayload {
            customer_id: &key.customer_id,
            source_ip: sources.join(","),
            environment: self.environment.as_str(),
            region: &self.region,
            dest_ip: &key.dest_ip,
            protocol: &key.protocol,
            port: &key.port,
        }
    }

    async fn request_ports(&self, key: &RuleKey, sources: &[String]) -> Result<(), FirewallError> {
        let payload = self.payload(key, sources);
        info!("requestPorts: {:?}", payload);
        let request = self
            .authorized(Method::POST, self.endpoint("api/ports")?)
            .await?
            .json(&payload);
        let (status, body) = self.send("ports", request).await?;
        if status != StatusCode::OK {
            return Err(FirewallError::Status {
                operation: "ports".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if flow_already_allowed(&body) {
            return Err(FirewallError::AlreadyAllowed {
                dest_ip: key.dest_ip.clone(),
                protocol: key.protocol.clone(),
                port: key.port.clone(),
            });
        }
        Ok(())
    }

    async fn remove_access_request(
        &self,
        key: &RuleKey,
        sources: &[String],
    ) -> Result<(), FirewallError> {
        let payload = self.payload(key, sources);
        info!("removeAccess: {:?}", payload);
        let request = self
            .authorized(Method::POST, self.endpoint("api/removeaccess")?)
            .await?
            .json(&payload);
        let (status, body) = self.send("removeaccess", request).await?;
        if status != StatusCode::OK {
            return Err(FirewallError::Status {
                operation: "removeaccess".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallProvider for IdcFirewallClient {
    async fn get_existing_customer_access(
        &self,
        _customer_id: &str,
        vip: &str,
    ) -> Result<Vec<Rule>, FirewallError> {
        let entries = self.get_access(vip).await?.unwrap_or_default();
        Ok(diff::flatten_existing(&entries, vip))
    }

    async fn sync_firewall_rules(
        &self,
        desired: &[FirewallRule],
        existing: &[Rule],
        vip: &str,
        customer_id: &str,
    ) -> Result<(), FirewallError> {
        if desired.is_empty() {
            return Err(FirewallError::MissingDesiredRules);
        }

        let desired = diff::flatten_desired(desired, customer_id);
        let delta = diff::reconcile_desired(&desired, existing, customer_id);
        debug!(
            "Firewall delta for {}: {} keys to add, {} keys to remove",
            vip,
            delta.to_add.len(),
            delta.to_remove.len()
        );

        for (key, sources) in &delta.to_remove {
            if key.port.parse::<u16>().is_err() {
                return Err(FirewallError::InvalidConfig(format!(
                    "invalid port {} for {}",
                    key.port, key.dest_ip
                )));
            }
            if self.rule_exists(sources, key).await? {
                info!(
                    "removing existing fwrule: {} -> {} {}/{} ({})",
                    sources.join(","),
                    key.dest_ip,
                    key.protocol,
                    key.port,
                    key.customer_id
                );
                self.remove_access_request(key, sources).await?;
            }
        }

        for (key, sources) in &delta.to_add {
            info!(
                "creating missing fwrule: {} -> {} {}/{} ({})",
                sources.join(","),
                key.dest_ip,
                key.protocol,
                key.port,
                key.customer_id
            );
            self.request_ports(key, sources).await?;
        }
        Ok(())
    }

    async fn remove_access(&self, rule: &FirewallRule) -> Result<(), FirewallError> {
        let customer_id = rule.namespace().unwrap_or_default();
        let Some(entries) = self.get_access(&rule.spec.destination_ip).await? else {
            info!("no rules found to remove for {}", rule.spec.destination_ip);
            return Ok(());
        };

        for entry in entries {
            for token in &entry.ports {
                let Some((protocol, port)) = diff::split_protocol_port(token) else {
                    error!("invalid port format: {}, skipping rule", token);
                    continue;
                };
                if port != rule.spec.port {
                    continue;
                }
                let key = RuleKey {
                    dest_ip: rule.spec.destination_ip.clone(),
                    port: port.to_string(),
                    protocol: protocol.to_string(),
                    customer_id: if entry.customer_id.is_empty() {
                        customer_id.clone()
                    } else {
                        entry.customer_id.clone()
                    },
                };
                self.remove_access_request(&key, &entry.source_address).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "idcfw_tests.rs"]
mod idcfw_tests;
