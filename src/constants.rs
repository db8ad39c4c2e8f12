// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the lbops operators and replicator.
//!
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for all lbops CRDs
pub const API_GROUP: &str = "private.cloud.io";

/// API version for all lbops CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "private.cloud.io/v1alpha1";

/// Kind name for `Loadbalancer` resource
pub const KIND_LOADBALANCER: &str = "Loadbalancer";

/// Kind name for `FirewallRule` resource
pub const KIND_FIREWALL_RULE: &str = "FirewallRule";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer held by the Loadbalancer operator on Loadbalancers, their child
/// FirewallRules and every Instance that is a pool member.
pub const LOADBALANCER_FINALIZER: &str = "private.cloud.io/loadbalancerOperator";

/// Finalizer held by the FirewallRule operator while a rule is applied.
pub const FIREWALL_FINALIZER: &str = "private.cloud.io/firewallOperator";

// ============================================================================
// Labels
// ============================================================================

/// Label carrying the owning cloud account on replicated objects
pub const LABEL_CLOUD_ACCOUNT_ID: &str = "cloud-account-id";

/// Label carrying the region on replicated objects
pub const LABEL_REGION: &str = "region";

/// Label carrying the availability zone on replicated objects
pub const LABEL_AVAILABILITY_ZONE: &str = "availability-zone";

/// Annotation carrying the user-facing name of a replicated Loadbalancer
pub const ANNOTATION_DISPLAY_NAME: &str = "private.cloud.io/display-name";

// ============================================================================
// Replicator Constants
// ============================================================================

/// Idle timeout for List/Watch streams before the stream is cancelled
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Liveness threshold: the replicator is unhealthy when no watch message
/// arrived within this window
pub const WATCH_HEALTH_THRESHOLD: Duration = Duration::from_secs(10);

/// Capacity of the watch event channel between the stream task and the cache
pub const WATCH_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the trigger channel between the cache and the work queue
pub const TRIGGER_CHANNEL_CAPACITY: usize = 1024;

/// Initial delay before re-listing after a failed List
pub const RELIST_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum delay between failed List attempts
pub const RELIST_MAX_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// Controller Constants
// ============================================================================

/// Default number of concurrent reconciles per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 1;

/// Requeue delay after a reconcile error
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue delay when a reconcile made partial progress
pub const PROGRESS_REQUEUE_DURATION_SECS: u64 = 5;

/// Periodic resync of settled resources (5 minutes)
pub const RESYNC_REQUEUE_DURATION_SECS: u64 = 300;

// ============================================================================
// Provider Constants
// ============================================================================

/// Default timeout for load balancer appliance HTTP requests
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

/// Tokens are refreshed this long before the appliance session expires
pub const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(10 * 60);

/// Name prefix of appliance objects owned by the operator
pub const PROVIDER_OBJECT_PREFIX: &str = "lbauto-";

/// Default firewall protocol for listener rules
pub const DEFAULT_FIREWALL_PROTOCOL: &str = "TCP";

// ============================================================================
// Health Server Constants
// ============================================================================

/// Default bind address for the health and metrics server
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8081";
