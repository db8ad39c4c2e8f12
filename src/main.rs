// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::{StreamExt, TryStreamExt};
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
        watcher, Controller, WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use lbops::{
    config::{Cli, Command, FirewallOperatorArgs, LoadbalancerOperatorArgs, ReplicatorArgs},
    constants::{
        DEFAULT_PROVIDER_TIMEOUT_SECS, ERROR_REQUEUE_DURATION_SECS, KIND_FIREWALL_RULE,
        KIND_LOADBALANCER, TRIGGER_CHANNEL_CAPACITY,
    },
    context::{FirewallContext, LoadbalancerContext},
    convert::LoadBalancerConverter,
    crd::{FirewallRule, Instance, Loadbalancer},
    firewall::IdcFirewallClient,
    health::{self, HealthState},
    lbprovider::HighwireClient,
    lister_watcher::ListerWatcher,
    metrics,
    pb::LoadBalancerPrivateServiceClient,
    reconcilers::{
        loadbalancers_for_instance, reconcile_firewall_rule, reconcile_loadbalancer,
        replicator::forward_triggers, LoadBalancerReplicator,
    },
    source::{GrpcSource, LoadBalancerSource},
    source_cache::{ObjectKey, SourceCache, WatchHealth},
    store::{KubeNamespaces, KubeStore},
    workqueue::WorkQueue,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("lbops")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    match cli.command {
        Command::Replicator(args) => run_replicator(client, args, cli.health_addr).await,
        Command::FirewallOperator(args) => {
            run_firewall_operator(client, args, cli.health_addr).await
        }
        Command::LoadbalancerOperator(args) => {
            run_loadbalancer_operator(client, args, cli.health_addr).await
        }
    }
}

// ============================================================================
// Replicator
// ============================================================================

async fn run_replicator(client: Client, args: ReplicatorArgs, health_addr: String) -> Result<()> {
    info!(
        "Starting LoadBalancer replicator for {}/{} against {}",
        args.region, args.availability_zone, args.compute_api_server_addr
    );

    let grpc = LoadBalancerPrivateServiceClient::connect(args.compute_api_server_addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.compute_api_server_addr))?;
    let source: Arc<dyn LoadBalancerSource> = Arc::new(GrpcSource::new(grpc));
    let converter = LoadBalancerConverter::new(args.region, args.availability_zone);

    let watch_health = Arc::new(WatchHealth::new());
    let lister_watcher = {
        let watch_health = Arc::clone(&watch_health);
        ListerWatcher::new(
            Arc::clone(&source),
            converter.clone(),
            Duration::from_secs(args.idle_timeout_secs),
        )
        .with_watch_success_hook(Arc::new(move || watch_health.reset()))
    };

    let cache = Arc::new(SourceCache::new());
    let queue = Arc::new(WorkQueue::new());
    let shutdown = CancellationToken::new();
    let (triggers_tx, triggers_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);

    let replicator = Arc::new(LoadBalancerReplicator::new(
        source,
        Arc::new(KubeStore::<Loadbalancer>::new(client.clone())),
        Arc::new(KubeNamespaces::new(client.clone())),
        converter,
        Arc::clone(&cache),
    ));
    let workers = tokio::spawn(Arc::clone(&replicator).run(
        Arc::clone(&queue),
        args.max_concurrent_reconciles,
    ));

    let health_state = HealthState::with_watch(watch_health);
    let result = tokio::select! {
        () = cache.run(lister_watcher, triggers_tx, shutdown.clone()) => {
            error!("CRITICAL: source cache exited unexpectedly");
            Err(anyhow::anyhow!("source cache exited unexpectedly"))
        }
        () = forward_triggers(triggers_rx, Arc::clone(&queue)) => {
            error!("CRITICAL: trigger channel closed unexpectedly");
            Err(anyhow::anyhow!("trigger channel closed unexpectedly"))
        }
        result = watch_targets(client, Arc::clone(&queue)) => {
            error!("CRITICAL: Loadbalancer target watch exited unexpectedly: {:?}", result);
            result.and(Err(anyhow::anyhow!("Loadbalancer target watch exited unexpectedly")))
        }
        result = health::serve(&health_addr, health_state, shutdown.clone()) => {
            error!("CRITICAL: health server exited unexpectedly: {:?}", result);
            result.and(Err(anyhow::anyhow!("health server exited unexpectedly")))
        }
        result = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            result.context("failed to listen for shutdown signal")
        }
    };

    shutdown.cancel();
    queue.shutdown();
    if let Err(e) = workers.await {
        warn!(error = %e, "Replicator workers did not stop cleanly");
    }
    info!("LoadBalancer replicator stopped");
    result
}

/// Queue the replication key of every target Loadbalancer that changes, so
/// status written by the operator reaches the Compute API Server.
async fn watch_targets(client: Client, queue: Arc<WorkQueue<ObjectKey>>) -> Result<()> {
    let api = Api::<Loadbalancer>::all(client);
    watcher(api, watcher::Config::default())
        .default_backoff()
        .touched_objects()
        .try_for_each(|lb| {
            if let Some(key) = ObjectKey::of(&lb) {
                debug!(key = %key, "Target Loadbalancer changed");
                queue.add(key);
            }
            futures::future::ready(Ok(()))
        })
        .await
        .context("Loadbalancer target watch failed")
}

// ============================================================================
// FirewallRule operator
// ============================================================================

async fn run_firewall_operator(
    client: Client,
    args: FirewallOperatorArgs,
    health_addr: String,
) -> Result<()> {
    info!(
        "Starting FirewallRule operator for {} ({})",
        args.region, args.environment
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS))
        .build()
        .context("failed to build firewall HTTP client")?;
    let provider = IdcFirewallClient::new(
        http,
        &args.firewall_api_url,
        &args.environment,
        &args.region,
        args.username,
        args.password,
    )?;
    let ctx = Arc::new(FirewallContext::new(client.clone(), Arc::new(provider)));
    let shutdown = CancellationToken::new();

    let api = Api::<FirewallRule>::all(client);
    let controller = Controller::new(api, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(args.max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(reconcile_firewall_rule_wrapper, error_policy_firewall, ctx)
        .for_each(|_| futures::future::ready(()));

    tokio::select! {
        () = controller => {
            info!("FirewallRule controller stopped");
            shutdown.cancel();
            Ok(())
        }
        result = health::serve(&health_addr, HealthState::default(), shutdown.clone()) => {
            error!("CRITICAL: health server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("health server exited unexpectedly without error")
        }
    }
}

async fn reconcile_firewall_rule_wrapper(
    rule: Arc<FirewallRule>,
    ctx: Arc<FirewallContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_firewall_rule(&ctx, &rule).await {
        Ok(action) => {
            info!(
                "Successfully reconciled FirewallRule: {}/{}",
                rule.namespace().unwrap_or_default(),
                rule.name_any()
            );
            metrics::record_reconciliation_success(KIND_FIREWALL_RULE, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile FirewallRule: {:#}", e);
            metrics::record_reconciliation_error(KIND_FIREWALL_RULE, start.elapsed());
            metrics::record_error(KIND_FIREWALL_RULE, "reconcile_error");
            Err(e.into())
        }
    }
}

fn error_policy_firewall(
    _resource: Arc<FirewallRule>,
    _err: &ReconcileError,
    _ctx: Arc<FirewallContext>,
) -> Action {
    metrics::record_reconciliation_requeue(KIND_FIREWALL_RULE, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

// ============================================================================
// Loadbalancer operator
// ============================================================================

async fn run_loadbalancer_operator(
    client: Client,
    args: LoadbalancerOperatorArgs,
    health_addr: String,
) -> Result<()> {
    info!("Starting Loadbalancer operator against {}", args.provider_url);

    let provider = HighwireClient::new(
        &args.provider_url,
        args.domain,
        args.username,
        args.password,
        args.environment_id,
        args.user_group,
        Duration::from_secs(args.provider_timeout_secs),
    )?;
    let ctx = Arc::new(LoadbalancerContext::new(client.clone(), Arc::new(provider)));
    let shutdown = CancellationToken::new();

    let controller = Controller::new(
        Api::<Loadbalancer>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(controller::Config::default().concurrency(args.max_concurrent_reconciles));
    let loadbalancers = controller.store();

    let controller = controller
        .owns(
            Api::<FirewallRule>::all(client.clone()),
            watcher::Config::default(),
        )
        .watches(
            Api::<Instance>::all(client),
            watcher::Config::default(),
            move |instance| {
                let current = loadbalancers.state();
                loadbalancers_for_instance(current.iter().map(|lb| &**lb), &instance)
                    .into_iter()
                    .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
                    .collect::<Vec<_>>()
            },
        )
        .shutdown_on_signal()
        .run(reconcile_loadbalancer_wrapper, error_policy_loadbalancer, ctx)
        .for_each(|_| futures::future::ready(()));

    tokio::select! {
        () = controller => {
            info!("Loadbalancer controller stopped");
            shutdown.cancel();
            Ok(())
        }
        result = health::serve(&health_addr, HealthState::default(), shutdown.clone()) => {
            error!("CRITICAL: health server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("health server exited unexpectedly without error")
        }
    }
}

async fn reconcile_loadbalancer_wrapper(
    lb: Arc<Loadbalancer>,
    ctx: Arc<LoadbalancerContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_loadbalancer(&ctx, &lb).await {
        Ok(action) => {
            info!(
                "Successfully reconciled Loadbalancer: {}/{}",
                lb.namespace().unwrap_or_default(),
                lb.name_any()
            );
            metrics::record_reconciliation_success(KIND_LOADBALANCER, start.elapsed());
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile Loadbalancer: {:#}", e);
            metrics::record_reconciliation_error(KIND_LOADBALANCER, start.elapsed());
            metrics::record_error(KIND_LOADBALANCER, "reconcile_error");
            Err(e.into())
        }
    }
}

fn error_policy_loadbalancer(
    _resource: Arc<Loadbalancer>,
    _err: &ReconcileError,
    _ctx: Arc<LoadbalancerContext>,
) -> Action {
    metrics::record_reconciliation_requeue(KIND_LOADBALANCER, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
