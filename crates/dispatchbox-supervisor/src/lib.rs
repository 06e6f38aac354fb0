//! Spawns and monitors the worker fleet, installs shutdown signal handling,
//! and propagates a shared stop signal.
//!
//! The source spawns N OS processes sharing a `multiprocessing.Event`. A
//! single Rust binary can run many concurrent async tasks far more cheaply
//! than OS processes, and the workspace has no precedent for spawning
//! sibling processes from Rust, so "N worker processes" is realized here as
//! N concurrently-spawned tasks inside one process — each with its own
//! dedicated database connection, never shared across tasks. True
//! OS-process fan-out remains available to an operator by running multiple
//! copies of the compiled binary; see DESIGN.md for this design decision.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dispatchbox_config::Config;
use dispatchbox_db::{RepoConfig, Repository};
use dispatchbox_handlers::HandlerRegistry;
use dispatchbox_worker::{Worker, WorkerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Start the worker fleet, wait for SIGINT/SIGTERM, then stop it gracefully.
/// Returns once every worker task has exited or the shutdown grace period
/// has elapsed.
pub async fn run(config: &Config, handlers: Arc<HandlerRegistry>) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let workers = spawn_workers(config, handlers, stop_rx).await?;

    wait_for_shutdown_signal().await;
    tracing::info!("stop signal received, shutting down worker fleet");
    shutdown(stop_tx, workers, Duration::from_secs(5)).await;
    Ok(())
}

/// Connect one Repository per worker and spawn its dispatch loop as a task.
/// Worker names are `worker-NN`; logs additionally carry the OS PID of the
/// (single) supervisor process, since every task shares it.
pub async fn spawn_workers(
    config: &Config,
    handlers: Arc<HandlerRegistry>,
    stop_rx: watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let repo_config = RepoConfig {
        connect_timeout: Duration::from_secs(10),
        query_timeout: Duration::from_secs(30),
        max_attempts: config.max_attempts,
        retry_backoff: config.retry_backoff(),
        max_connections: 5,
    };

    // Run migrations once, up front, rather than once per worker: sqlx's
    // migration tracking table would otherwise see N concurrent migrators
    // racing at startup.
    let migrator = Repository::connect(&config.dsn, repo_config.clone())
        .await
        .context("failed to connect to database for migration")?;
    migrator
        .migrate()
        .await
        .context("failed to run database migrations")?;

    let mut handles = Vec::with_capacity(config.num_workers);
    for i in 0..config.num_workers {
        let name = format!("worker-{i:02}");
        let repo = Repository::connect(&config.dsn, repo_config.clone())
            .await
            .with_context(|| format!("{name}: failed to connect to database"))?;

        let worker_config = WorkerConfig {
            name: name.clone(),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            max_parallel: config.max_parallel,
            handler_timeout: config.handler_timeout,
        };
        let handlers = Arc::clone(&handlers);
        let rx = stop_rx.clone();

        let handle = tokio::spawn(async move {
            let mut worker = Worker::new(Arc::new(repo), handlers, worker_config, rx);
            worker.run().await;
        });
        tracing::info!(worker = %name, pid = %std::process::id(), "started worker task");
        handles.push(handle);
    }

    Ok(handles)
}

/// Set the shared stop signal and wait up to `grace` for every worker task
/// to finish draining its current batch.
pub async fn shutdown(stop_tx: watch::Sender<bool>, workers: Vec<JoinHandle<()>>, grace: Duration) {
    let _ = stop_tx.send(true);
    let join_all = futures_util::future::join_all(workers);
    if tokio::time::timeout(grace, join_all).await.is_err() {
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "worker fleet did not exit within the shutdown grace period"
        );
    }
}

/// Wait for either SIGINT or (on unix) SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
