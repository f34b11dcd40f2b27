//! Shard topology and per-assignment shard state
//!
//! `ShardDescriptor` is what the source reports about a shard;
//! `ShardInfo` is one entry of a worker's assignment snapshot.

use serde::{Deserialize, Serialize};

use super::checkpoint::Checkpoint;
use super::identifier::StreamIdentifier;

/// Contiguous hash-key range owned by a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashKeyRange {
    pub starting_hash_key: u128,
    pub ending_hash_key: u128,
}

/// A shard as reported by the stream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard_id: String,
    /// Parent shard for splits and merges
    pub parent_shard_id: Option<String>,
    /// Second parent, present only after a merge
    pub adjacent_parent_shard_id: Option<String>,
    pub hash_key_range: Option<HashKeyRange>,
}

impl ShardDescriptor {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
            hash_key_range: None,
        }
    }

    /// All parents of this shard, 0, 1, or 2 entries
    pub fn parent_shard_ids(&self) -> Vec<String> {
        self.parent_shard_id
            .iter()
            .chain(self.adjacent_parent_shard_id.iter())
            .cloned()
            .collect()
    }
}

/// Child shard surfaced by the source when a parent reaches shard end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildShard {
    pub shard_id: String,
    pub parent_shard_ids: Vec<String>,
}

/// One entry of a worker's current assignment snapshot.
///
/// The concurrency token is an opaque per-assignment nonce; two successive
/// tenancies of the same shard carry different tokens and must never be
/// conflated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: String,
    pub concurrency_token: String,
    pub parent_shard_ids: Vec<String>,
    pub checkpoint: Checkpoint,
    /// Present in multi-stream mode, absent for single-stream workers
    pub stream_identifier: Option<StreamIdentifier>,
}

impl ShardInfo {
    pub fn new(
        shard_id: impl Into<String>,
        concurrency_token: impl Into<String>,
        parent_shard_ids: Vec<String>,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            concurrency_token: concurrency_token.into(),
            parent_shard_ids,
            checkpoint,
            stream_identifier: None,
        }
    }

    /// Attaches the owning stream for multi-stream deployments
    pub fn with_stream(mut self, stream_identifier: StreamIdentifier) -> Self {
        self.stream_identifier = Some(stream_identifier);
        self
    }

    /// Lease key for this shard: bare shard id in single-stream mode,
    /// `account:name:epoch:shardId` in multi-stream mode
    pub fn lease_key(&self) -> String {
        crate::leases::lease_key_for(self.stream_identifier.as_ref(), &self.shard_id)
    }

    /// Lease key of a sibling shard in the same stream, used to look up
    /// parent and child leases
    pub fn lease_key_for_sibling(&self, shard_id: &str) -> String {
        crate::leases::lease_key_for(self.stream_identifier.as_ref(), shard_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_key_is_qualified_only_in_multi_stream_mode() {
        let single = ShardInfo::new("shardId-0001", "tok", vec![], Checkpoint::TrimHorizon);
        assert_eq!(single.lease_key(), "shardId-0001");

        let multi = single
            .clone()
            .with_stream(StreamIdentifier::multi("acc", "orders", 7));
        assert_eq!(multi.lease_key(), "acc:orders:7:shardId-0001");
        assert_eq!(
            multi.lease_key_for_sibling("shardId-0002"),
            "acc:orders:7:shardId-0002"
        );
    }

    #[test]
    fn descriptor_collects_both_parents() {
        let mut descriptor = ShardDescriptor::new("shardId-0003");
        descriptor.parent_shard_id = Some("shardId-0001".into());
        descriptor.adjacent_parent_shard_id = Some("shardId-0002".into());
        assert_eq!(
            descriptor.parent_shard_ids(),
            vec!["shardId-0001".to_string(), "shardId-0002".to_string()]
        );
    }
}
