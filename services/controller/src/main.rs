//! Tideway rollout controller.
//!
//! Reconciles rollout resources against their declared release strategy:
//! shifting traffic weight, scaling replica sets, gating on analysis runs,
//! and pausing for approval. The admin API drives spec changes and the
//! promote/abort/retry/restart operations.
//!
//! Runs against mock cluster/routing/analysis backends unless wired to real
//! ones; the reconciliation engine is identical either way.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tideway_controller::api::{self, ApiState};
use tideway_controller::{
    AnalysisGate, Config, EngineDeps, EventRecorder, MemoryStore, MockAnalysisBackend,
    MockCluster, MockRouter, Reconciler, ReconcilerConfig, ReplicaSetManager, RolloutStore,
    SqliteStore, TrafficWeightController, WorkQueue,
};
use tideway_events::NullSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tideway controller");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        listen_addr = %config.listen_addr,
        workers = config.workers,
        history_limit = config.history_limit,
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Arc<dyn RolloutStore> = match &config.data_dir {
        Some(dir) => {
            let path = std::path::Path::new(dir).join("rollouts.db");
            info!(path = %path.display(), "Opening durable rollout store");
            Arc::new(SqliteStore::open(&path)?)
        }
        None => {
            info!("No TIDEWAY_DATA_DIR set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let queue = Arc::new(WorkQueue::new());

    let cluster = Arc::new(MockCluster::new());
    let deps = EngineDeps {
        replicasets: ReplicaSetManager::new(cluster, config.history_limit),
        traffic: TrafficWeightController::new(Arc::new(MockRouter::new())),
        analysis: AnalysisGate::new(Arc::new(MockAnalysisBackend::new())),
        recorder: EventRecorder::new(Arc::new(NullSink)),
    };

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        deps,
        ReconcilerConfig {
            workers: config.workers,
            resync_interval: config.resync_interval,
            ..ReconcilerConfig::default()
        },
    ));
    let reconciler_handle = tokio::spawn({
        let reconciler = Arc::clone(&reconciler);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconciler.run(shutdown_rx).await;
        }
    });

    // Start the admin API
    let app = api::router(ApiState {
        store: Arc::clone(&store),
        queue: Arc::clone(&queue),
    });
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("binding admin API listener")?;
    info!(listen_addr = %config.listen_addr, "Admin API listening");

    let server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let mut shutdown = server_shutdown;
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin API server failed");
        }
    });

    // Wait for ctrl-c
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = server.await;
    let _ = reconciler_handle.await;
    info!("Controller stopped");
    Ok(())
}
