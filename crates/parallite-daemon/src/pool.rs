//! Bounded pool of executor workers: lease, release, recycle, shutdown.
//!
//! Capacity is enforced by counting live workers (idle + leased +
//! in-termination) rather than by pre-allocating slots, so workers are
//! spawned lazily on first demand as the original design calls for.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::config::DaemonConfig;
use crate::shutdown::ShutdownSignal;
use crate::worker::{WorkerId, WorkerProcess};

/// Why a lease attempt did not yield a worker.
#[derive(Debug)]
pub enum LeaseError {
    /// Shutdown was triggered, or `cancel` resolved, while waiting.
    Cancelled,
    /// A worker failed to spawn and no other worker exists (or is ever
    /// going to free up) to make progress instead — waiting further would
    /// hang forever.
    SpawnFailed(std::io::Error),
}

struct PoolState {
    idle: VecDeque<WorkerProcess>,
    leased: usize,
    in_termination: usize,
    shutting_down: bool,
}

/// Shared handle to the pool. Cloning is cheap; every clone refers to the
/// same underlying state.
#[derive(Clone)]
pub struct WorkerPool {
    cfg: Arc<DaemonConfig>,
    state: Arc<Mutex<PoolState>>,
    notify: Arc<Notify>,
    next_id: Arc<AtomicU64>,
    spawn_failures: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(cfg: Arc<DaemonConfig>) -> Self {
        WorkerPool {
            cfg,
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                leased: 0,
                in_termination: 0,
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            spawn_failures: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pre-spawns `fixed_workers` workers eagerly, as the supervisor does
    /// at startup when a fixed pool size was requested.
    pub async fn prespawn(&self) -> std::io::Result<()> {
        if self.cfg.fixed_workers == 0 {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        for _ in 0..self.cfg.fixed_workers {
            let id = self.alloc_id();
            let worker = WorkerProcess::spawn(&self.cfg, id)?;
            state.idle.push_back(worker);
        }
        Ok(())
    }

    fn alloc_id(&self) -> WorkerId {
        WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn capacity(&self) -> usize {
        self.cfg.capacity()
    }

    /// Whether any worker has ever failed to spawn (surfaced by the
    /// supervisor under `fail_mode=stop`).
    pub fn had_spawn_failure(&self) -> bool {
        self.spawn_failures.load(Ordering::Relaxed)
    }

    /// Returns an idle worker, spawning one if the pool is below capacity,
    /// or waits for one to be released. Fails with [`LeaseError::Cancelled`]
    /// if `cancel` resolves first (shutdown) or the pool has been shut
    /// down, or [`LeaseError::SpawnFailed`] if a worker failed to spawn and
    /// no other worker can ever free up to take its place.
    pub async fn lease(&self, cancel: &ShutdownSignal) -> Result<WorkerProcess, LeaseError> {
        loop {
            if cancel.is_triggered() {
                return Err(LeaseError::Cancelled);
            }
            // Registered while still holding `state`'s lock, so a
            // concurrent `release`/`recycle`/`finish_termination` either
            // completes entirely before this check (and we see its effect
            // directly) or its `notify_waiters()` call — which always
            // happens after it has released the lock — necessarily comes
            // after this `notified()` was created. Either way, no wakeup
            // between "we decided to wait" and "we started waiting" can be
            // lost, unlike creating the `Notified` future after the lock
            // (and the check it guards) have already been dropped.
            let notified;
            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return Err(LeaseError::Cancelled);
                }
                if let Some(worker) = state.idle.pop_front() {
                    state.leased += 1;
                    return Ok(worker);
                }
                let alive = state.idle.len() + state.leased + state.in_termination;
                if alive < self.capacity() {
                    let id = self.alloc_id();
                    match WorkerProcess::spawn(&self.cfg, id) {
                        Ok(worker) => {
                            state.leased += 1;
                            return Ok(worker);
                        }
                        Err(err) => {
                            self.spawn_failures.store(true, Ordering::Relaxed);
                            tracing::error!("failed to spawn worker {id}: {err}");
                            if alive == 0 {
                                // No idle, leased, or in-termination worker
                                // exists either, so nothing will ever
                                // release and wake this waiter up.
                                return Err(LeaseError::SpawnFailed(err));
                            }
                            // A live worker elsewhere may still free up;
                            // fall through to waiting on it instead of a
                            // fresh spawn.
                        }
                    }
                }
                notified = self.notify.notified();
            }

            tokio::select! {
                _ = notified => {}
                _ = cancel.triggered() => return Err(LeaseError::Cancelled),
            }
        }
    }

    /// Returns a healthy worker to the idle queue (FIFO), or terminates it
    /// immediately if the pool is already shutting down.
    pub async fn release(&self, worker: WorkerProcess) {
        let mut state = self.state.lock().await;
        state.leased -= 1;
        if state.shutting_down {
            state.in_termination += 1;
            drop(state);
            self.spawn_termination(worker);
        } else {
            state.idle.push_back(worker);
        }
        self.notify.notify_waiters();
    }

    /// Marks a worker broken and terminates it asynchronously without
    /// blocking the caller.
    pub async fn recycle(&self, worker: WorkerProcess) {
        let mut state = self.state.lock().await;
        state.leased -= 1;
        state.in_termination += 1;
        drop(state);
        self.spawn_termination(worker);
        self.notify.notify_waiters();
    }

    fn spawn_termination(&self, worker: WorkerProcess) {
        let pool = self.clone();
        tokio::spawn(async move {
            worker
                .terminate(DaemonConfig::WORKER_TERM_GRACE, DaemonConfig::WORKER_KILL_GRACE)
                .await;
            pool.finish_termination().await;
        });
    }

    async fn finish_termination(&self) {
        let mut state = self.state.lock().await;
        state.in_termination -= 1;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Refuses new leases, drains idle workers, and terminates everything
    /// still in the idle queue. Leased workers are terminated as they're
    /// released (see [`release`]).
    pub async fn shutdown(&self) {
        let idle: Vec<WorkerProcess> = {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.idle.drain(..).collect()
        };
        self.notify.notify_waiters();

        for worker in idle {
            worker
                .terminate(DaemonConfig::WORKER_TERM_GRACE, DaemonConfig::WORKER_KILL_GRACE)
                .await;
        }
    }

    /// Waits (bounded) for every leased/in-termination worker to clear,
    /// used by the supervisor's drain step.
    pub async fn wait_quiescent(&self, timeout: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Same create-before-unlock ordering as `lease`, so a
            // concurrent release finishing just after the check above still
            // wakes this waiter instead of being missed.
            let notified = {
                let state = self.state.lock().await;
                if state.leased == 0 && state.in_termination == 0 {
                    return;
                }
                self.notify.notified()
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return;
            }
        }
    }

    #[cfg(test)]
    pub async fn snapshot_counts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().await;
        (state.idle.len(), state.leased, state.in_termination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_cfg(fixed_workers: usize) -> Arc<DaemonConfig> {
        Arc::new(DaemonConfig {
            config_path: None,
            endpoint: crate::config::Endpoint::Unix(PathBuf::from("/tmp/parallite-test.sock")),
            timeout_ms: DaemonConfig::DEFAULT_TIMEOUT_MS,
            fixed_workers,
            prefix_name: DaemonConfig::DEFAULT_PREFIX_NAME.to_string(),
            fail_mode: crate::config::FailMode::Continue,
            max_payload_bytes: DaemonConfig::DEFAULT_MAX_PAYLOAD_BYTES,
            worker_cmd: PathBuf::from("/bin/cat"),
            worker_args: Vec::new(),
        })
    }

    #[tokio::test]
    async fn lease_spawns_up_to_capacity_then_accounts_correctly() {
        // `cat` behaves as a trivial pass-through process for pool
        // accounting purposes; this test never calls `execute`.
        let cfg = test_cfg(2);
        let pool = WorkerPool::new(cfg);

        let cancel = ShutdownSignal::new();
        let w1 = pool.lease(&cancel).await.expect("first lease");
        let w2 = pool.lease(&cancel).await.expect("second lease");
        assert_eq!(pool.snapshot_counts().await, (0, 2, 0));

        pool.release(w1).await;
        assert_eq!(pool.snapshot_counts().await, (1, 1, 0));

        pool.recycle(w2).await;
        pool.wait_quiescent(std::time::Duration::from_secs(2)).await;
        let (_, leased, term) = pool.snapshot_counts().await;
        assert_eq!((leased, term), (0, 0));
    }

    #[tokio::test]
    async fn shutdown_terminates_idle_workers() {
        let cfg = test_cfg(1);
        let pool = WorkerPool::new(cfg);
        pool.prespawn().await.expect("prespawn");
        assert_eq!(pool.snapshot_counts().await, (1, 0, 0));

        pool.shutdown().await;
        assert_eq!(pool.snapshot_counts().await, (0, 0, 0));

        let cancel = ShutdownSignal::new();
        assert!(matches!(pool.lease(&cancel).await, Err(LeaseError::Cancelled)));
    }

    #[tokio::test]
    async fn lease_fails_fast_when_spawn_fails_and_no_worker_can_ever_free_up() {
        let cfg = Arc::new(DaemonConfig {
            config_path: None,
            endpoint: crate::config::Endpoint::Unix(PathBuf::from("/tmp/parallite-test-badcmd.sock")),
            timeout_ms: DaemonConfig::DEFAULT_TIMEOUT_MS,
            fixed_workers: 1,
            prefix_name: DaemonConfig::DEFAULT_PREFIX_NAME.to_string(),
            fail_mode: crate::config::FailMode::Continue,
            max_payload_bytes: DaemonConfig::DEFAULT_MAX_PAYLOAD_BYTES,
            worker_cmd: PathBuf::from("/nonexistent/parallite-worker-does-not-exist"),
            worker_args: Vec::new(),
        });
        let pool = WorkerPool::new(cfg);
        let cancel = ShutdownSignal::new();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pool.lease(&cancel)).await;
        let lease_result = result.expect("lease resolved instead of hanging");
        assert!(matches!(lease_result, Err(LeaseError::SpawnFailed(_))));
        assert!(pool.had_spawn_failure());
    }
}
