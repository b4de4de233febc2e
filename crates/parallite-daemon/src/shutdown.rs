//! A shared, race-free "has shutdown been requested" signal.
//!
//! Every waiter that needs to wake up exactly once on shutdown (a blocked
//! lease, a pending task) creates its `notified()` future *before*
//! checking the flag, which is the pattern `tokio::sync::Notify` itself
//! documents for avoiding the missed-wakeup race between `notify_waiters`
//! and a late subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Idempotent: only the first call wakes waiters.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once, the first time shutdown is triggered (including if
    /// it already was before this call).
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn triggered_resolves_immediately_if_already_set() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.triggered().await;
    }

    #[tokio::test]
    async fn triggered_wakes_a_concurrent_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.triggered().await;
        });
        tokio::task::yield_now().await;
        signal.trigger();
        handle.await.unwrap();
    }
}
