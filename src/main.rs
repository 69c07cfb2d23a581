// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use ako_operator::{
    avi::client::HttpAviClientFactory,
    constants::{
        AVI_REQUEST_TIMEOUT_SECS, KIND_AKO_DEPLOYMENT_CONFIG, KIND_CLUSTER, KIND_MACHINE,
        REQUEUE_WHEN_NOT_READY_SECS, REQUEUE_WHEN_READY_SECS, TOKIO_WORKER_THREADS,
    },
    context::{cluster_for_machine, Context, Stores},
    crd::{AKODeploymentConfig, Cluster, Machine},
    errors::ReconcileError,
    labels::MACHINE_CONTROL_PLANE_LABEL,
    metrics,
    reconcilers::{
        cluster_phases::{ClusterLifecycle, KubeconfigCleanupProbe},
        credentials::CredentialProvisioner,
        haprovider::{cluster_for_service, HaProvider, SystemResolver},
        reconcile_akodeploymentconfig, reconcile_cluster, reconcile_machine,
        resources::{KubeSecretStore, SecretStore},
    },
    settings::OperatorSettings,
};
use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, Resource, ResourceExt,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("ako-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

fn init_logging() {
    // Respects RUST_LOG (default: info) and RUST_LOG_FORMAT=json|text
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
}

async fn async_main() -> Result<()> {
    let settings = OperatorSettings::parse();
    init_logging();

    info!("Starting AKO operator");
    settings.validate().map_err(anyhow::Error::msg)?;
    info!(
        ha_provider = settings.control_plane_ha_provider,
        bootstrap_cluster = settings.bootstrap_cluster,
        operator_namespace = %settings.operator_namespace,
        "Loaded operator settings"
    );
    let metrics_addr: SocketAddr = settings.metrics_addr.parse()?;

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let secrets: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(client.clone()));
    let avi = Arc::new(HttpAviClientFactory::new(Duration::from_secs(
        AVI_REQUEST_TIMEOUT_SECS,
    )));
    let credentials = Arc::new(CredentialProvisioner::new(
        secrets.clone(),
        avi,
        &settings.operator_namespace,
    ));
    let probe = Arc::new(KubeconfigCleanupProbe::new(secrets.clone()));
    let lifecycle = Arc::new(ClusterLifecycle::new(secrets, credentials, probe));
    let ha_provider = Arc::new(HaProvider::new(
        client.clone(),
        settings.clone(),
        Arc::new(SystemResolver),
    ));

    let config_controller = Controller::new(
        Api::<AKODeploymentConfig>::all(client.clone()),
        Config::default(),
    );
    let ctx = Arc::new(Context {
        client: client.clone(),
        settings,
        stores: Stores {
            ako_deployment_configs: config_controller.store(),
        },
        lifecycle,
        ha_provider,
    });

    info!("Starting all controllers");

    // Controllers should never exit - if one does, log it and exit the process
    tokio::select! {
        result = run_akodeploymentconfig_controller(config_controller, ctx.clone()) => {
            error!("CRITICAL: AKODeploymentConfig controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("AKODeploymentConfig controller exited unexpectedly without error")
        }
        result = run_cluster_controller(ctx.clone()) => {
            error!("CRITICAL: Cluster controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Cluster controller exited unexpectedly without error")
        }
        result = run_machine_controller(ctx.clone()) => {
            error!("CRITICAL: Machine controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Machine controller exited unexpectedly without error")
        }
        result = metrics::serve(metrics_addr) => {
            error!("CRITICAL: Metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}

/// Run the `AKODeploymentConfig` controller
///
/// Cluster events fan out to every configuration that selects the cluster plus
/// the one currently labelled as its owner.
async fn run_akodeploymentconfig_controller(
    controller: Controller<AKODeploymentConfig>,
    ctx: Arc<Context>,
) -> Result<()> {
    info!("Starting AKODeploymentConfig controller");

    let stores = ctx.stores.clone();
    controller
        .watches(
            Api::<Cluster>::all(ctx.client.clone()),
            Config::default(),
            move |cluster| stores.configs_for_cluster(&cluster),
        )
        .run(reconcile_akodeploymentconfig_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `Cluster` controller
async fn run_cluster_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Cluster controller");

    let client = ctx.client.clone();
    Controller::new(Api::<Cluster>::all(client.clone()), Config::default())
        .watches(Api::<Service>::all(client.clone()), Config::default(), |service| {
            cluster_for_service(&service)
        })
        .watches(
            Api::<Machine>::all(client),
            Config::default().labels(MACHINE_CONTROL_PLANE_LABEL),
            |machine| cluster_for_machine(&machine),
        )
        .run(reconcile_cluster_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `Machine` controller
async fn run_machine_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Machine controller");
    debug!("Watching control plane machines only");

    Controller::new(
        Api::<Machine>::all(ctx.client.clone()),
        Config::default().labels(MACHINE_CONTROL_PLANE_LABEL),
    )
    .run(reconcile_machine_wrapper, error_policy, ctx)
    .for_each(|_| futures::future::ready(()))
    .await;

    Ok(())
}

/// Turns a reconcile result into the next action and records metrics.
fn finish(
    kind: &str,
    name: &str,
    started: Instant,
    result: Result<Option<Duration>, ReconcileError>,
) -> Result<Action, ReconcileError> {
    match result {
        Ok(Some(after)) => {
            debug!(kind, name, requeue_after = ?after, "Requeue requested");
            metrics::record_reconciliation_requeue(kind, "phase");
            Ok(Action::requeue(after))
        }
        Ok(None) => {
            info!("Successfully reconciled {kind}: {name}");
            metrics::record_reconciliation_success(kind, started.elapsed());
            Ok(Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS)))
        }
        Err(e) => {
            error!("Failed to reconcile {kind} {name}: {e}");
            metrics::record_reconciliation_error(kind, e.metric_label(), started.elapsed());
            Err(e)
        }
    }
}

/// Reconcile wrapper for `AKODeploymentConfig`
async fn reconcile_akodeploymentconfig_wrapper(
    config: Arc<AKODeploymentConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = reconcile_akodeploymentconfig(ctx, (*config).clone()).await;
    finish(KIND_AKO_DEPLOYMENT_CONFIG, &config.name_any(), started, result)
}

/// Reconcile wrapper for `Cluster`
async fn reconcile_cluster_wrapper(
    cluster: Arc<Cluster>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let name = format!(
        "{}/{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    );
    let result = reconcile_cluster(ctx, (*cluster).clone()).await;
    finish(KIND_CLUSTER, &name, started, result)
}

/// Reconcile wrapper for `Machine`
async fn reconcile_machine_wrapper(
    machine: Arc<Machine>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let name = format!(
        "{}/{}",
        machine.namespace().unwrap_or_default(),
        machine.name_any()
    );
    let result = reconcile_machine(ctx, (*machine).clone())
        .await
        .map(|()| None);
    finish(KIND_MACHINE, &name, started, result)
}

/// Error policy shared by all controllers
///
/// Retryable failures come back quickly; terminal ones wait for the slow resync
/// or a spec change.
fn error_policy<K>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    if err.is_retryable() {
        metrics::record_reconciliation_requeue(&K::kind(&()).to_string(), "error");
        Action::requeue(Duration::from_secs(REQUEUE_WHEN_NOT_READY_SECS))
    } else {
        warn!(
            name = %resource.name_any(),
            error = %err,
            "Terminal reconcile error, waiting for a change"
        );
        Action::requeue(Duration::from_secs(REQUEUE_WHEN_READY_SECS))
    }
}
