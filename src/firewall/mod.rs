// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Firewall rule API seam.
//!
//! The FirewallRule operator talks to the firewall through
//! [`FirewallProvider`]. [`idcfw::IdcFirewallClient`] implements it over the
//! bearer-token HTTP API.

pub mod idcfw;

use crate::crd::FirewallRule;
use crate::diff::Rule;
use crate::errors::FirewallError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use idcfw::IdcFirewallClient;

/// Firewall environment zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Stag,
}

impl Environment {
    /// Parse `prod` / `stag` in any case.
    ///
    /// # Errors
    ///
    /// Returns [`FirewallError::InvalidConfig`] for any other value.
    pub fn parse(value: &str) -> Result<Self, FirewallError> {
        match value.to_ascii_lowercase().as_str() {
            "prod" => Ok(Self::Prod),
            "stag" => Ok(Self::Stag),
            _ => Err(FirewallError::InvalidConfig(format!(
                "invalid environment: {value}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "Prod",
            Self::Stag => "Stag",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region spelling expected by the firewall API.
#[must_use]
pub fn normalize_region(region: &str) -> String {
    match region.to_ascii_lowercase().as_str() {
        "flex" => "Flex".to_string(),
        "im" => "IM".to_string(),
        _ => region.to_string(),
    }
}

/// One applied rule as reported by `GET /api/getallaccess`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub source_address: Vec<String>,
    #[serde(default)]
    pub dest_address: Vec<String>,
    /// `PROTOCOL_PORT` tokens, e.g. `TCP_443`.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub protocol: String,
}

#[async_trait]
pub trait FirewallProvider: Send + Sync {
    /// Rules currently applied towards `vip`, flattened.
    async fn get_existing_customer_access(
        &self,
        customer_id: &str,
        vip: &str,
    ) -> Result<Vec<Rule>, FirewallError>;

    /// Converge the firewall for `vip` on `desired`.
    async fn sync_firewall_rules(
        &self,
        desired: &[FirewallRule],
        existing: &[Rule],
        vip: &str,
        customer_id: &str,
    ) -> Result<(), FirewallError>;

    /// Remove whatever is applied for the rule's destination and port.
    async fn remove_access(&self, rule: &FirewallRule) -> Result<(), FirewallError>;
}
