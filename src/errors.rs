// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the replicator and the provider clients.
//!
//! - [`ConvertError`] - A wire message that cannot be mapped to a Kubernetes object
//! - [`ListerWatcherError`] - Failures of the List/Watch streams
//! - [`FirewallError`] - Firewall rule API failures
//! - [`ProviderError`] - Load balancer appliance API failures
//!
//! Target store errors live with the store seam in [`crate::store::StoreError`].

use std::time::Duration;
use thiserror::Error;

/// A LoadBalancer message that cannot be converted.
///
/// Conversion failures are data errors: the offending record is logged and
/// skipped, the rest of the batch is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// The message has no metadata block
    #[error("load balancer message has no metadata")]
    MissingMetadata,

    /// Identity fields are empty
    #[error("load balancer message is missing {field}")]
    MissingField {
        /// Name of the empty field (e.g. `cloudAccountId`)
        field: &'static str,
    },

    /// A listener or pool port outside `1..=65535`
    #[error("invalid port {port} in listener of {resource_id}")]
    InvalidPort {
        /// Offending port value
        port: i32,
        /// Resource the listener belongs to
        resource_id: String,
    },

    /// A timestamp that cannot be represented
    #[error("invalid timestamp {field}: {reason}")]
    InvalidTimestamp {
        field: &'static str,
        reason: String,
    },
}

/// Errors surfaced by [`crate::lister_watcher::ListerWatcher`].
#[derive(Error, Debug)]
pub enum ListerWatcherError {
    /// The RPC failed or the stream broke
    #[error("source stream error: {0}")]
    Rpc(#[from] tonic::Status),

    /// No message arrived within the idle timeout
    #[error("no message received for {0:?}, stream cancelled")]
    IdleTimeout(Duration),

    /// The list stream ended without a bookmark
    #[error("list stream ended without a bookmark")]
    MissingBookmark,
}

/// Errors from the firewall rule API client.
#[derive(Error, Debug)]
pub enum FirewallError {
    /// Transport failure talking to the firewall API
    #[error("firewall API request {operation} failed: {source}")]
    Http {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The firewall API answered with an unexpected status
    #[error("firewall API request {operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// No token could be obtained or validated
    #[error("firewall API authentication failed: {0}")]
    Auth(String),

    /// Configuration rejected at startup (environment, region, URL)
    #[error("invalid firewall configuration: {0}")]
    InvalidConfig(String),

    /// A sync was requested with no desired rules
    #[error("missing desired rules")]
    MissingDesiredRules,

    /// The API reported the flow as already present on add
    #[error("rule for {dest_ip} {protocol}/{port} is already allowed")]
    AlreadyAllowed {
        dest_ip: String,
        protocol: String,
        port: String,
    },
}

/// Errors from the load balancer appliance client.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport failure (connect, timeout, TLS)
    #[error("load balancer API request {operation} failed: {source}")]
    Http {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response; `message` is the JSON operator message
    #[error("load balancer API request {operation} failed: {message}")]
    Status {
        operation: String,
        status: u16,
        message: String,
    },

    /// Login failed or returned no token
    #[error("load balancer API login failed: {0}")]
    Login(String),

    /// A response body that does not match the expected shape
    #[error("unexpected response to {operation}: {reason}")]
    Decode { operation: String, reason: String },

    /// The Loadbalancer spec cannot be provisioned as written
    #[error("invalid load balancer configuration: {0}")]
    InvalidConfig(String),
}

impl ProviderError {
    /// `true` for transport errors and 429/5xx responses.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_connect() || source.is_timeout(),
            Self::Status { status, .. } => reqwest::StatusCode::from_u16(*status)
                .is_ok_and(crate::reconcilers::retry::is_retryable_http_status),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
