//! Shutdown coordination shared by the coordinator and every executor.
//!
//! Initiating shutdown wakes every task waiting in [`ShutdownState::wait`],
//! so executors can flush their plants before the primary persists them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared shutdown state for coordinating a graceful stop.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Flips to `true` once shutdown is initiated; no new work should start
    initiated: Arc<watch::Sender<bool>>,
    /// Set once every worker has flushed and the store is final
    complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        let (initiated, _) = watch::channel(false);
        Self {
            initiated: Arc::new(initiated),
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        *self.initiated.borrow()
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes every waiter. Repeated calls are no-ops.
    pub fn initiate_shutdown(&self) {
        if self.initiated.send_replace(true) {
            return;
        }
        info!("🛑 Shutdown initiated - workers will flush their plants");
    }

    /// Marks shutdown as complete.
    pub fn complete_shutdown(&self) {
        self.complete.store(true, Ordering::Release);
        info!("✅ All plants persisted - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait(&self) {
        let mut rx = self.initiated.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|initiated| *initiated).await;
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
