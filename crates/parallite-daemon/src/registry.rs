//! Correlates in-flight tasks by id and tracks each one's deadline.
//!
//! Resolution of a task entry is one-shot: whichever of
//! {response, deadline, shutdown} the Dispatcher's `select!` observes
//! first is the only one that matters — the registry just removes the
//! entry and stops caring once a [`TaskGuard`] is resolved or dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::shutdown::ShutdownSignal;

struct Entry {
    deadline: Instant,
}

pub struct TaskRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    shutdown: ShutdownSignal,
}

/// An in-flight task's registration. Removed from the registry on drop,
/// so every exit path (success, worker error, timeout, shutdown) cleans up
/// without needing a matching explicit call.
pub struct TaskGuard {
    registry: Arc<TaskRegistry>,
    pub task_id: String,
    pub deadline: Instant,
}

impl TaskRegistry {
    pub fn new(shutdown: ShutdownSignal) -> Arc<Self> {
        Arc::new(TaskRegistry {
            entries: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Registers a new task with a deadline of `now + timeout_ms`. Fails if
    /// shutdown has already begun — no new registrations are accepted once
    /// draining starts (§4.8 step 2).
    pub async fn register(
        self: &Arc<Self>,
        task_id: String,
        timeout_ms: u64,
    ) -> Result<TaskGuard, TaskError> {
        if self.shutdown.is_triggered() {
            return Err(TaskError::Shutdown);
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut entries = self.entries.lock().await;
        if self.shutdown.is_triggered() {
            return Err(TaskError::Shutdown);
        }
        entries.insert(task_id.clone(), Entry { deadline });
        Ok(TaskGuard {
            registry: self.clone(),
            task_id,
            deadline,
        })
    }

    pub async fn in_flight_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// How much longer the slowest in-flight task's own deadline allows it
    /// to run, used by the supervisor to report why a drain is still
    /// waiting.
    pub async fn longest_remaining_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .map(|entry| entry.deadline.saturating_duration_since(now))
            .max()
    }

    async fn remove(&self, task_id: &str) {
        self.entries.lock().await.remove(task_id);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let task_id = std::mem::take(&mut self.task_id);
        tokio::spawn(async move {
            registry.remove(&task_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_tracks_in_flight_count_and_drop_clears_it() {
        let registry = TaskRegistry::new(ShutdownSignal::new());
        assert_eq!(registry.in_flight_count().await, 0);

        let guard = registry.register("T1".to_string(), 1000).await.unwrap();
        assert_eq!(registry.in_flight_count().await, 1);

        drop(guard);
        // Drop spawns the removal; yield until it runs.
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if registry.in_flight_count().await == 0 {
                break;
            }
        }
        assert_eq!(registry.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn register_refuses_after_shutdown() {
        let shutdown = ShutdownSignal::new();
        let registry = TaskRegistry::new(shutdown.clone());
        shutdown.trigger();
        let err = registry.register("T1".to_string(), 1000).await.unwrap_err();
        assert!(matches!(err, TaskError::Shutdown));
    }
}
