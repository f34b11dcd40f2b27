//! Lease model and lease-table plumbing
//!
//! A lease is the durable record of a worker's claim on a shard. Lease
//! keys are derived deterministically from the owning stream and shard so
//! every worker computes the same key for the same shard.

pub mod cleanup;
pub mod coordinator;
pub mod memory;
pub mod store;
pub mod sync_task;

use serde::{Deserialize, Serialize};

use crate::stream::{Checkpoint, StreamIdentifier};

pub use cleanup::{LeaseCleanupConfig, LeaseCleanupManager, LeaseCleanupResult, LeasePendingDeletion};
pub use coordinator::LeaseCoordinator;
pub use memory::InMemoryLeaseStore;
pub use store::{LeaseStore, UpdateField};
pub use sync_task::{ShardSyncTaskManager, ShardSyncTaskManagerCache};

/// Durable record of a worker's claim on a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_key: String,
    pub owner: Option<String>,
    /// Monotonic version used for optimistic concurrency in the store
    pub lease_counter: u64,
    pub checkpoint: Checkpoint,
    pub parent_shard_ids: Vec<String>,
    /// Child lease keys, filled in once the shard ends; empty means
    /// not yet discovered
    pub child_shard_ids: Vec<String>,
    pub pending_checkpoint: Option<Checkpoint>,
}

impl Lease {
    /// Builds an unowned lease at the given starting position
    pub fn new(lease_key: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            lease_key: lease_key.into(),
            owner: None,
            lease_counter: 0,
            checkpoint,
            parent_shard_ids: Vec::new(),
            child_shard_ids: Vec::new(),
            pending_checkpoint: None,
        }
    }

    pub fn with_parents(mut self, parent_shard_ids: Vec<String>) -> Self {
        self.parent_shard_ids = parent_shard_ids;
        self
    }

    pub fn with_children(mut self, child_shard_ids: Vec<String>) -> Self {
        self.child_shard_ids = child_shard_ids;
        self
    }

    /// Stream this lease belongs to, decoded from a multi-stream key.
    /// Returns `None` for single-stream keys.
    pub fn stream_identifier(&self) -> Option<StreamIdentifier> {
        decode_multi_stream_lease_key(&self.lease_key).map(|(stream, _)| stream)
    }
}

/// Derives the lease key for a shard: the bare shard id in single-stream
/// mode, `account:name:epoch:shardId` in multi-stream mode
pub fn lease_key_for(stream_identifier: Option<&StreamIdentifier>, shard_id: &str) -> String {
    match stream_identifier {
        Some(id @ StreamIdentifier::Multi { .. }) => format!("{}:{shard_id}", id.serialize()),
        _ => shard_id.to_string(),
    }
}

/// Splits a multi-stream lease key `account:name:epoch:shardId` back into
/// its stream identity and shard id
pub fn decode_multi_stream_lease_key(lease_key: &str) -> Option<(StreamIdentifier, String)> {
    let parts: Vec<&str> = lease_key.splitn(4, ':').collect();
    if parts.len() != 4 {
        return None;
    }
    let stream = StreamIdentifier::parse_multi(&parts[..3].join(":")).ok()?;
    Some((stream, parts[3].to_string()))
}
