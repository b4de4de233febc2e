//! Startup and shutdown orchestration: wires the pool, registry, dispatcher
//! and listener together and drives the daemon's lifecycle end to end.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DaemonConfig;
use crate::dispatcher::Dispatcher;
use crate::listener::BoundListener;
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;
use crate::shutdown::ShutdownSignal;

/// How long the drain step waits for in-flight tasks before giving up and
/// terminating workers out from under them anyway.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the daemon to completion: binds, serves, and only returns once a
/// shutdown signal has been handled and every worker has been torn down.
pub async fn run(cfg: DaemonConfig) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let shutdown = ShutdownSignal::new();

    let pool = WorkerPool::new(cfg.clone());
    pool.prespawn().await?;
    if pool.had_spawn_failure() && cfg.fail_mode == crate::config::FailMode::Stop {
        anyhow::bail!("worker pre-spawn failed under fail-mode=stop");
    }

    let registry = TaskRegistry::new(shutdown.clone());
    let dispatcher = Dispatcher::new(cfg.clone(), pool.clone(), registry.clone(), shutdown.clone());
    let listener = BoundListener::bind(&cfg).await?;

    tracing::info!(endpoint = ?cfg.endpoint, capacity = pool.capacity(), "daemon ready");

    let serve_shutdown = shutdown.clone();
    let serve_task = tokio::spawn(async move { listener.serve(dispatcher, serve_shutdown).await });

    wait_for_termination_signal(&shutdown).await;

    tracing::info!("shutdown requested, draining in-flight tasks");
    shutdown.trigger();

    // `serve_task` only resolves once every accepted connection (including
    // ones already past leasing and racing only their own deadline) has
    // written its response, so this is the drain step proper.
    if tokio::time::timeout(DRAIN_TIMEOUT, serve_task).await.is_err() {
        tracing::warn!(
            in_flight = registry.in_flight_count().await,
            longest_remaining = ?registry.longest_remaining_deadline().await,
            "drain timed out with tasks still in flight, terminating workers anyway"
        );
    }

    pool.shutdown().await;
    // Workers still leased when the drain timed out are terminated as their
    // dispatch eventually releases them (`WorkerPool::release`); give that a
    // bounded chance to finish so `main` doesn't return out from under
    // processes still mid-`terminate`.
    pool.wait_quiescent(DaemonConfig::WORKER_TERM_GRACE + DaemonConfig::WORKER_KILL_GRACE)
        .await;
    tracing::info!("daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination_signal(shutdown: &ShutdownSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    tokio::select! {
        _ = term.recv() => tracing::info!("received SIGTERM"),
        _ = int.recv() => tracing::info!("received SIGINT"),
        _ = shutdown.triggered() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal(shutdown: &ShutdownSignal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received ctrl-c"),
        _ = shutdown.triggered() => {}
    }
}
