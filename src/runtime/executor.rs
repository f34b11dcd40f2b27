//! Bounded consumer executor
//!
//! Runs per-shard consumer work on the tokio runtime behind a fixed
//! number of slots with a bounded admission queue. When both are full,
//! spawns are rejected; the scheduler turns those rejections into
//! diagnostic events rather than losing them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{CoordinatorError, Result};

/// Configuration for the consumer executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrently running tasks
    pub capacity: usize,
    /// Tasks allowed to wait for a slot before spawns are rejected
    pub max_queue_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            capacity: cpus.max(4),
            max_queue_depth: cpus.max(4) * 4,
        }
    }
}

/// Point-in-time view of the executor, attached to rejection diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStateSnapshot {
    pub capacity: usize,
    pub active_count: usize,
    pub queue_depth: usize,
}

/// Slot-bounded task pool for consumer work
pub struct ConsumerExecutor {
    config: ExecutorConfig,
    slots: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl ConsumerExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Admits a task if a slot is free or the queue has room, otherwise
    /// rejects with the current executor state.
    pub fn try_spawn<F>(&self, future: F) -> Result<tokio::task::JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let queued_now = self.queued.load(Ordering::Acquire);
        if self.slots.available_permits() == 0 && queued_now >= self.config.max_queue_depth {
            let state = self.state();
            return Err(CoordinatorError::RejectedTask {
                active: state.active_count,
                capacity: state.capacity,
            });
        }

        let slots = Arc::clone(&self.slots);
        let active = Arc::clone(&self.active);
        let queued = Arc::clone(&self.queued);
        queued.fetch_add(1, Ordering::AcqRel);

        Ok(tokio::spawn(async move {
            // Semaphore is never closed while the executor lives.
            let Ok(_permit) = slots.acquire().await else {
                queued.fetch_sub(1, Ordering::AcqRel);
                return;
            };
            queued.fetch_sub(1, Ordering::AcqRel);
            active.fetch_add(1, Ordering::AcqRel);
            future.await;
            active.fetch_sub(1, Ordering::AcqRel);
        }))
    }

    /// Current pool occupancy
    pub fn state(&self) -> ExecutorStateSnapshot {
        ExecutorStateSnapshot {
            capacity: self.config.capacity,
            active_count: self.active.load(Ordering::Acquire),
            queue_depth: self.queued.load(Ordering::Acquire),
        }
    }
}

impl Default for ConsumerExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}
