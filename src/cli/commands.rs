use crate::cli::{Commands, Config, ControllerArgs, PvcWatcherArgs};
use crate::controller::{Controller, PodEventHandler, WorkQueue};
use crate::error::handle_error;
use crate::k8s::{K8sClient, ObjectStore, ResourceWatcher, SyncSignal, TrackedObject};
use crate::metrics::{self, MissingVolumeMetrics, PrometheusExporter};
use crate::pvc_watcher::PvcWatcher;
use crate::Result;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn handle_command(config: Config, command: Commands) -> Result<()> {
    info!(
        metrics_path = %config.metrics_path,
        port = config.port,
        backup_annotation = %config.backup_annotation,
        exclude_annotation = %config.exclude_annotation,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match command {
        Commands::Controller(args) => run_controller(config, args, cancel).await,
        Commands::PvcWatcher(args) => run_pvc_watcher(config, args, cancel).await,
    }
}

async fn run_controller(config: Config, args: ControllerArgs, cancel: CancellationToken) -> Result<()> {
    let client = K8sClient::try_default().await?;

    let registry = metrics::new_registry()?;
    let volume_metrics = Arc::new(MissingVolumeMetrics::new()?);
    volume_metrics.register(&registry)?;
    let exporter = PrometheusExporter::new(registry, config.port, config.metrics_path.as_str());
    let ready = exporter.readiness();

    let queue = Arc::new(WorkQueue::new());
    let pods = ObjectStore::new();
    let tombstones = ObjectStore::new();
    let handler = Arc::new(PodEventHandler::new(Arc::clone(&queue), tombstones.clone()));
    let pod_watcher = ResourceWatcher::with_handler(client.pods_all(), pods.clone(), handler);
    let synced = vec![pod_watcher.sync_signal()];

    let controller = Arc::new(Controller::new(
        Arc::new(pods),
        tombstones,
        queue,
        volume_metrics,
        config.annotation_keys(),
        synced.clone(),
    ));

    let tasks = vec![
        spawn_watcher(pod_watcher, cancel.clone()),
        spawn_exporter(exporter, cancel.clone()),
        spawn_readiness(synced, ready, cancel.clone()),
    ];

    info!("Velero backup controller started");
    let result = controller
        .run(args.threads, args.sync_timeout(), cancel.clone())
        .await;

    cancel.cancel();
    join_tasks(tasks).await;
    result
}

async fn run_pvc_watcher(config: Config, args: PvcWatcherArgs, cancel: CancellationToken) -> Result<()> {
    let client = K8sClient::try_default().await?;

    let pod_watcher = ResourceWatcher::new(client.pods_all(), ObjectStore::new());
    let pvc_watcher = ResourceWatcher::new(client.pvcs_all(), ObjectStore::new());
    let ns_watcher = ResourceWatcher::new(client.namespaces(), ObjectStore::new());
    let synced = vec![
        pod_watcher.sync_signal(),
        pvc_watcher.sync_signal(),
        ns_watcher.sync_signal(),
    ];

    let watcher = PvcWatcher::new(
        pod_watcher.store().clone(),
        pvc_watcher.store().clone(),
        ns_watcher.store().clone(),
        config.annotation_keys(),
        synced.clone(),
    )?;

    let registry = metrics::new_registry()?;
    registry.register(Box::new(watcher.clone()))?;
    let exporter = PrometheusExporter::new(registry, config.port, config.metrics_path.as_str());
    let ready = exporter.readiness();

    let tasks = vec![
        spawn_watcher(pod_watcher, cancel.clone()),
        spawn_watcher(pvc_watcher, cancel.clone()),
        spawn_watcher(ns_watcher, cancel.clone()),
        spawn_exporter(exporter, cancel.clone()),
        spawn_readiness(synced, ready, cancel.clone()),
    ];

    info!("Velero PVC backup watcher started");
    watcher.wait_for_sync(args.sync_timeout(), &cancel).await;

    cancel.cancelled().await;
    info!("Stopping PVC backup watcher");
    join_tasks(tasks).await;
    Ok(())
}

fn spawn_watcher<K>(watcher: ResourceWatcher<K>, cancel: CancellationToken) -> JoinHandle<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    for<'a> TrackedObject: From<&'a K>,
{
    tokio::spawn(async move {
        if let Err(e) = watcher.run(cancel).await {
            handle_error(&e);
        }
    })
}

/// The exporter going down takes the whole process with it
fn spawn_exporter(exporter: PrometheusExporter, cancel: CancellationToken) -> JoinHandle<()> {
    let server = {
        let cancel = cancel.clone();
        tokio::spawn(async move { exporter.start(cancel).await })
    };
    cancel_on_failure("metrics server", server, cancel)
}

/// Cancel `cancel` when `task` returns an error or panics
fn cancel_on_failure(
    name: &'static str,
    task: JoinHandle<Result<()>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => handle_error(&e),
            Err(e) => error!(task = name, "Task failed: {}", e),
        }
        cancel.cancel();
    })
}

fn spawn_readiness(
    synced: Vec<SyncSignal>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let all = futures::future::join_all(synced.iter().map(SyncSignal::synced));
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = all => ready.store(true, Ordering::Relaxed),
        }
    })
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    for res in futures::future::join_all(tasks).await {
        if let Err(e) = res {
            warn!("Background task failed: {}", e);
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    cancel.cancel();
}
