//! Worker lifecycle states
//!
//! The scheduler publishes its coarse lifecycle through a listener so
//! embedding applications can track readiness and shutdown progress.

/// Coarse lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet initializing
    Created,
    /// Initialization in progress
    Initializing,
    /// Initialization finished, process loop not yet running
    Initialized,
    /// Process loop running
    Started,
    /// Shutdown requested, teardown in progress
    ShutDownStarted,
    /// Fully stopped
    ShutDown,
}

/// Callback for worker state transitions
pub trait WorkerStateChangeListener: Send + Sync {
    fn on_worker_state_change(&self, state: WorkerState);
}

/// Listener that ignores all transitions
#[derive(Default)]
pub struct NoOpWorkerStateChangeListener;

impl WorkerStateChangeListener for NoOpWorkerStateChangeListener {
    fn on_worker_state_change(&self, _state: WorkerState) {}
}
