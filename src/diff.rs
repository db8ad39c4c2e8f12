// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Set reconciliation between desired and applied firewall rules.
//!
//! Rules are compared in flattened form, one [`Rule`] per source address.
//! Only applied rules have their `/32` host suffix stripped (see
//! [`flatten_existing`]); desired sources are compared as written.
//! [`reconcile_desired`] matches every desired rule against the applied set
//! and returns what must be added and removed, grouped by [`RuleKey`] so one
//! API call carries every source address of a destination/protocol/port.
//!
//! # Example
//!
//! ```rust
//! use lbops::diff::{reconcile_desired, Rule};
//!
//! let desired = vec![Rule::new("10.0.0.1", "146.152.227.10", "TCP", "9090", "123")];
//! let existing = vec![Rule::new("10.0.0.2", "146.152.227.10", "tcp", "9090", "123")];
//!
//! let delta = reconcile_desired(&desired, &existing, "123");
//! assert_eq!(delta.to_add.values().next().unwrap(), &vec!["10.0.0.1".to_string()]);
//! assert_eq!(delta.to_remove.values().next().unwrap(), &vec!["10.0.0.2".to_string()]);
//! ```

use crate::crd::FirewallRule;
use crate::firewall::AccessEntry;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Object-group prefixes used by the firewall for host and network groups.
const GROUP_PREFIXES: [&str; 2] = ["h_", "n_"];

/// One flattened rule: a single source address allowed to reach
/// `dest_ip` on `protocol/port`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rule {
    pub source_ip: String,
    pub dest_ip: String,
    pub protocol: String,
    pub port: String,
    /// Tenant (cloud account) the rule was applied for.
    pub customer_id: String,
}

impl Rule {
    pub fn new(
        source_ip: impl Into<String>,
        dest_ip: impl Into<String>,
        protocol: impl Into<String>,
        port: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> Self {
        Self {
            source_ip: source_ip.into(),
            dest_ip: dest_ip.into(),
            protocol: protocol.into(),
            port: port.into(),
            customer_id: customer_id.into(),
        }
    }

    fn matches(&self, other: &Rule) -> bool {
        self.dest_ip == other.dest_ip
            && self.port == other.port
            && self.protocol.eq_ignore_ascii_case(&other.protocol)
            && self.source_ip == other.source_ip
    }

    fn key(&self, customer_id: &str) -> RuleKey {
        RuleKey {
            dest_ip: self.dest_ip.clone(),
            port: self.port.clone(),
            protocol: self.protocol.clone(),
            customer_id: customer_id.to_string(),
        }
    }
}

/// Grouping key of a rule: everything but the source address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub dest_ip: String,
    pub port: String,
    pub protocol: String,
    pub customer_id: String,
}

/// Source addresses to add and remove, per key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleDelta {
    pub to_add: BTreeMap<RuleKey, Vec<String>>,
    pub to_remove: BTreeMap<RuleKey, Vec<String>>,
}

impl RuleDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Strip a `/32` host suffix. Other prefix lengths are kept as written.
#[must_use]
pub fn normalize_source(source_ip: &str) -> &str {
    source_ip.strip_suffix("/32").unwrap_or(source_ip)
}

/// Compute the minimal add/remove sets turning `existing` into `desired`.
///
/// A desired rule matches an existing one when destination, port, source
/// and protocol (case-insensitive) are equal; each existing rule absorbs at
/// most one desired rule. Unmatched desired rules are grouped under
/// `customer_id`. Leftover existing rules are grouped under their own
/// customer id, because they may belong to another tenant.
///
/// Source lists are sorted, so the result does not depend on input order.
#[must_use]
pub fn reconcile_desired(desired: &[Rule], existing: &[Rule], customer_id: &str) -> RuleDelta {
    let mut remaining: Vec<&Rule> = existing.iter().collect();
    let mut delta = RuleDelta::default();

    for rule in desired {
        if let Some(index) = remaining.iter().position(|e| rule.matches(e)) {
            debug!(
                "fwrule exists, no change required: {} -> {} {}/{} ({})",
                rule.source_ip, rule.dest_ip, rule.protocol, rule.port, customer_id
            );
            remaining.remove(index);
            continue;
        }
        debug!(
            "fwrule missing, adding: {} -> {} {}/{} ({})",
            rule.source_ip, rule.dest_ip, rule.protocol, rule.port, customer_id
        );
        delta
            .to_add
            .entry(rule.key(customer_id))
            .or_default()
            .push(rule.source_ip.clone());
    }

    for rule in remaining {
        debug!(
            "fwrule not needed, removing: {} -> {} {}/{} ({})",
            rule.source_ip, rule.dest_ip, rule.protocol, rule.port, rule.customer_id
        );
        delta
            .to_remove
            .entry(rule.key(&rule.customer_id))
            .or_default()
            .push(rule.source_ip.clone());
    }

    for sources in delta.to_add.values_mut().chain(delta.to_remove.values_mut()) {
        sources.sort();
    }
    delta
}

/// Split a `PROTOCOL_PORT` token. `None` unless it has exactly two parts.
#[must_use]
pub fn split_protocol_port(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(protocol), Some(port), None) => Some((protocol, port)),
        _ => None,
    }
}

fn is_group(address: &str) -> bool {
    GROUP_PREFIXES.iter().any(|p| address.starts_with(p))
}

/// Flatten applied rules reported by the firewall API for `vip`.
///
/// Host/network object groups and destinations other than `vip` are
/// skipped; malformed port tokens are logged and skipped.
#[must_use]
pub fn flatten_existing(entries: &[AccessEntry], vip: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for entry in entries {
        for source in entry.source_address.iter().filter(|s| !is_group(s)) {
            for dest in entry
                .dest_address
                .iter()
                .filter(|d| !is_group(d) && d.as_str() == vip)
            {
                for token in &entry.ports {
                    let Some((protocol, port)) = split_protocol_port(token) else {
                        error!("invalid port format: {}, skipping rule", token);
                        continue;
                    };
                    rules.push(Rule::new(
                        normalize_source(source),
                        dest.as_str(),
                        protocol,
                        port,
                        entry.customer_id.as_str(),
                    ));
                }
            }
        }
    }
    rules
}

/// Flatten FirewallRule specs, one rule per source address.
#[must_use]
pub fn flatten_desired(rules: &[FirewallRule], customer_id: &str) -> Vec<Rule> {
    rules
        .iter()
        .flat_map(|fw| {
            fw.spec.source_ips.iter().map(|source| {
                Rule::new(
                    source.as_str(),
                    fw.spec.destination_ip.as_str(),
                    fw.spec.protocol.as_str(),
                    fw.spec.port.as_str(),
                    customer_id,
                )
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;
