//! Stream source abstraction
//!
//! The backing stream service: shard listing, iterator creation, and
//! record retrieval. Implementations map transient service failures to
//! `CoordinatorError::Dependency` and missing shards or streams to
//! `CoordinatorError::ResourceNotFound`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::identifier::StreamIdentifier;
use super::shard::{ChildShard, ShardDescriptor};

/// Where a shard iterator starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardIteratorKind {
    Latest,
    TrimHorizon,
    AtTimestamp,
    AtSequenceNumber,
    AfterSequenceNumber,
}

/// A single record fetched from a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Bytes,
}

/// Result of a `get_records` call
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    /// Populated by the source once the shard has reached its end
    pub child_shards: Vec<ChildShard>,
    /// Token for the next read; `None` once the shard is exhausted
    pub next_iterator: Option<String>,
}

/// The partitioned stream service the coordinator consumes from
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Lists every shard of the stream, open and closed
    async fn list_shards(
        &self,
        stream_identifier: &StreamIdentifier,
    ) -> Result<Vec<ShardDescriptor>>;

    /// Creates an iterator over a shard
    async fn get_shard_iterator(
        &self,
        stream_identifier: &StreamIdentifier,
        shard_id: &str,
        kind: ShardIteratorKind,
    ) -> Result<String>;

    /// Reads up to `limit` records at the iterator position
    async fn get_records(&self, iterator: &str, limit: usize) -> Result<RecordBatch>;
}
