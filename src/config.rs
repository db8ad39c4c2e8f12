// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line configuration.
//!
//! One binary runs one role. Every flag can also be set from the environment,
//! which is how the deployments pass credentials.

use crate::constants::{
    DEFAULT_HEALTH_ADDR, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_RECONCILES,
    DEFAULT_PROVIDER_TIMEOUT_SECS,
};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Listen address of the health and metrics server
    #[arg(long, env = "HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR, global = true)]
    pub health_addr: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mirror Compute API load balancers into the cluster
    Replicator(ReplicatorArgs),
    /// Apply FirewallRules through the firewall API
    FirewallOperator(FirewallOperatorArgs),
    /// Provision Loadbalancers on the appliance
    LoadbalancerOperator(LoadbalancerOperatorArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplicatorArgs {
    /// gRPC address of the Compute API Server, e.g. `http://compute-api-server:30001`
    #[arg(long, env = "COMPUTE_API_SERVER_ADDR")]
    pub compute_api_server_addr: String,

    #[arg(long, env = "REGION")]
    pub region: String,

    #[arg(long, env = "AVAILABILITY_ZONE")]
    pub availability_zone: String,

    /// Restart a list or watch after this many seconds without a message
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,

    #[arg(
        long,
        env = "MAX_CONCURRENT_RECONCILES",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES
    )]
    pub max_concurrent_reconciles: u16,
}

#[derive(Args, Debug, Clone)]
pub struct FirewallOperatorArgs {
    #[arg(long, env = "FIREWALL_API_URL")]
    pub firewall_api_url: String,

    /// `prod` or `stag`
    #[arg(long, env = "FIREWALL_ENVIRONMENT")]
    pub environment: String,

    #[arg(long, env = "REGION")]
    pub region: String,

    #[arg(long, env = "FIREWALL_USERNAME")]
    pub username: String,

    #[arg(long, env = "FIREWALL_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(
        long,
        env = "MAX_CONCURRENT_RECONCILES",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES
    )]
    pub max_concurrent_reconciles: u16,
}

#[derive(Args, Debug, Clone)]
pub struct LoadbalancerOperatorArgs {
    /// Base URL of the load balancer appliance API
    #[arg(long, env = "PROVIDER_URL")]
    pub provider_url: String,

    /// Login domain of the appliance account
    #[arg(long, env = "PROVIDER_DOMAIN")]
    pub domain: String,

    #[arg(long, env = "PROVIDER_USERNAME")]
    pub username: String,

    #[arg(long, env = "PROVIDER_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = DEFAULT_PROVIDER_TIMEOUT_SECS)]
    pub provider_timeout_secs: u64,

    /// Appliance environment id new objects are created in
    #[arg(long, env = "PROVIDER_ENVIRONMENT_ID")]
    pub environment_id: i32,

    /// Appliance user group owning new objects
    #[arg(long, env = "PROVIDER_USER_GROUP")]
    pub user_group: i32,

    #[arg(
        long,
        env = "MAX_CONCURRENT_RECONCILES",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES
    )]
    pub max_concurrent_reconciles: u16,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
