//! Worker-local coordination
//!
//! The scheduler loop, the consumer registry it diffs against, the
//! leader-elected periodic shard sync, and the diagnostics channel for
//! undeliverable async errors.

pub mod diagnostics;
pub mod leader;
pub mod registry;
pub mod scheduler;
pub mod shard_sync;
pub mod worker_state;

pub use diagnostics::{
    DiagnosticEventHandler, ExecutorStateEvent, LoggingDiagnosticEventHandler, RejectedTaskEvent,
    UndeliverableErrorSink,
};
pub use leader::{LeaderDecider, StaticLeaderDecider};
pub use registry::ShardConsumerRegistry;
pub use scheduler::{
    MultiStreamTracker, Scheduler, SchedulerConfig, SchedulerDependencies, StreamTracker,
};
pub use shard_sync::PeriodicShardSyncManager;
pub use worker_state::{NoOpWorkerStateChangeListener, WorkerState, WorkerStateChangeListener};
