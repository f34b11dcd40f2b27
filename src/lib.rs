//! Riptide Core - Stream-consumer coordination runtime
//!
//! This crate provides the per-worker control plane for consuming
//! partitioned, shard-structured event streams across a fleet of
//! cooperating workers:
//! - Scheduler loop diffing lease assignments against live consumers
//! - Leader-elected periodic shard discovery and lease sync
//! - Deferred cleanup of completed and garbage shard leases
//!
//! The stream source, lease table, leader election, and per-shard
//! consumers are abstracted behind traits so the control plane can be
//! driven against any backing service.

pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod leases;
pub mod metrics;
pub mod runtime;
pub mod stream;

pub use coordinator::{Scheduler, SchedulerConfig, SchedulerDependencies, StreamTracker};
pub use error::CoordinatorError;
pub use runtime::ShutdownSignal;

/// Default scheduler loop period in milliseconds
pub const DEFAULT_PARENT_SHARD_POLL_INTERVAL_MILLIS: u64 = 10_000;

/// Default bound on initialization attempts
pub const DEFAULT_MAX_INITIALIZATION_ATTEMPTS: u32 = 20;

/// Default delay before the first periodic shard sync in milliseconds
pub const DEFAULT_SHARD_SYNC_INITIAL_DELAY_MILLIS: u64 = 60_000;

/// Default periodic shard sync interval in milliseconds
pub const DEFAULT_PERIODIC_SHARD_SYNC_INTERVAL_MILLIS: u64 = 300_000;
