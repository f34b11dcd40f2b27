//! Graceful shutdown signalling
//!
//! One broadcast channel fans the shutdown request out to the scheduler
//! loop and both background managers. The signal latches: tasks that
//! subscribe after the trigger can still observe it via `is_triggered`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

struct Inner {
    sender: broadcast::Sender<()>,
    triggered: AtomicBool,
}

/// Latching shutdown signal shared across tasks
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                sender,
                triggered: AtomicBool::new(false),
            }),
        }
    }

    /// Triggers shutdown. Subsequent triggers are no-ops.
    pub fn shutdown(&self) {
        if !self.inner.triggered.swap(true, Ordering::AcqRel) {
            let _ = self.inner.sender.send(());
        }
    }

    /// Whether shutdown has already been triggered
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Receiver that resolves when shutdown is triggered. Subscribe
    /// before spawning the task that waits on it.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.sender.subscribe()
    }

    /// Number of tasks currently waiting on the signal
    pub fn waiter_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
