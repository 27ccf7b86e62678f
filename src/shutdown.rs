//! Graceful shutdown coordination.
//!
//! A watch channel broadcasts the shutdown signal to every open stream, and an
//! atomic counter tracks streams so `main` can wait for them to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

use crate::metrics;

/// Shutdown coordinator shared by the server and every stream.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    shutdown_tx: watch::Sender<bool>,
    /// Kept so the channel never reports "sender dropped" to waiters.
    shutdown_rx: watch::Receiver<bool>,
    active_streams: AtomicU64,
    drain_notify: Notify,
    next_stream_id: AtomicU64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                shutdown_tx,
                shutdown_rx,
                active_streams: AtomicU64::new(0),
                drain_notify: Notify::new(),
                next_stream_id: AtomicU64::new(1),
            }),
        }
    }

    /// Signal shutdown to all streams.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown_rx.borrow()
    }

    /// Resolve once shutdown has been signaled.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.inner.shutdown_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives in `inner`, which outlives this borrow of `self`.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn active_streams(&self) -> u64 {
        self.inner.active_streams.load(Ordering::Relaxed)
    }

    /// Register a new stream and return a guard that unregisters it on drop.
    pub fn register_stream(&self) -> StreamGuard {
        let id = self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let count = self.inner.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_streams(count);

        StreamGuard {
            coordinator: self.clone(),
            id,
        }
    }

    /// Wait for all streams to drain.
    pub async fn wait_for_drain(&self) {
        loop {
            // Register interest before reading the count so a concurrent
            // final unregister cannot slip between the two.
            let notified = self.inner.drain_notify.notified();
            if self.inner.active_streams.load(Ordering::Relaxed) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn unregister_stream(&self) {
        let result = self.inner.active_streams.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |curr| curr.checked_sub(1),
        );

        match result {
            Ok(prev) => {
                let count = prev - 1;
                metrics::set_active_streams(count);
                if count == 0 {
                    self.inner.drain_notify.notify_waiters();
                }
            }
            Err(_) => {
                tracing::error!("unregister_stream called with active_streams already at 0");
                metrics::set_active_streams(0);
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one stream's lifetime.
pub struct StreamGuard {
    coordinator: ShutdownCoordinator,
    id: u64,
}

impl StreamGuard {
    /// Process-unique stream number, used to build request ids.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.coordinator.unregister_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_tracking() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.active_streams(), 0);

        let guard1 = coordinator.register_stream();
        let guard2 = coordinator.register_stream();
        assert_eq!(coordinator.active_streams(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(coordinator.active_streams(), 1);

        drop(guard2);
        assert_eq!(coordinator.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown());

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_shutdown().await })
        };

        coordinator.shutdown();
        assert!(coordinator.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_last_stream() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register_stream();

        let drained = tokio::time::timeout(Duration::from_millis(20), coordinator.wait_for_drain()).await;
        assert!(drained.is_err());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_drain())
            .await
            .expect("drain should complete");
    }
}
