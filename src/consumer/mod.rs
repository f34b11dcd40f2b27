//! Per-shard consumer seam
//!
//! The scheduler never looks inside a consumer. It builds one per leased
//! shard tenancy, asks it to shut down when the lease is gone, and sweeps
//! it once shutdown completes. Internally a consumer is expected to run a
//! lifecycle of the shape
//! `Waiting -> Initializing -> Processing -> Ending -> Shutdown`,
//! but only the two shutdown probes below are visible from here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::{Checkpoint, ShardInfo};

/// Opaque handle to a running per-shard consumer
pub trait ShardConsumer: Send + Sync {
    /// Asks the consumer to wind down. Idempotent; repeated requests are
    /// no-ops.
    fn request_shutdown(&self);

    /// True once shutdown has been requested
    fn is_shutdown_requested(&self) -> bool;

    /// True once the consumer has fully wound down and may be dropped
    fn is_shutdown_complete(&self) -> bool;
}

/// Builds a consumer for one shard tenancy
pub trait ShardConsumerFactory: Send + Sync {
    fn create(&self, shard_info: &ShardInfo) -> Arc<dyn ShardConsumer>;
}

/// Read side of the checkpoint table
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Most recently committed position for the lease key
    async fn checkpoint_for(&self, lease_key: &str) -> Result<Checkpoint>;
}
