//! Lease coordinator abstraction
//!
//! The lease-taking side of the control plane: renews owned leases,
//! steals expired ones, and exposes the worker's current assignment
//! snapshot to the scheduler. Implementations live with the lease store
//! backend; the scheduler only drives the lifecycle and reads
//! assignments.

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::ShardInfo;

/// Worker-side lease acquisition and renewal
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Prepares backing state (e.g. creates the lease table). Called
    /// once, before any lease is taken.
    async fn initialize(&self) -> Result<()>;

    /// Starts renewing and taking leases in the background
    async fn start(&self) -> Result<()>;

    /// Releases owned leases and stops background renewal. Idempotent.
    async fn stop(&self);

    /// Snapshot of the shards this worker currently holds leases for.
    /// Each entry carries the concurrency token of the present tenancy.
    async fn current_assignments(&self) -> Vec<ShardInfo>;
}
