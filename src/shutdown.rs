use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Coordinates graceful shutdown of long-lived connection handlers.
///
/// Handlers call [`ShutdownCoordinator::register`] when they start and keep
/// the returned guard alive for as long as they run. When
/// [`ShutdownCoordinator::shutdown`] is called every registered handler
/// observes `true` on its watch receiver and is expected to send a close
/// frame and exit.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    active: Arc<AtomicUsize>,
}

/// RAII guard that decrements the active connection count on drop.
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Release);
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a connection handler.
    pub fn register(&self) -> (ConnectionGuard, watch::Receiver<bool>) {
        self.active.fetch_add(1, Ordering::AcqRel);
        (
            ConnectionGuard {
                active: self.active.clone(),
            },
            self.tx.subscribe(),
        )
    }

    /// Signal every registered handler to shut down.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of handlers currently holding a guard.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
