//! Stream data model and source abstraction
//!
//! Identifies streams, positions within shards, and the shard topology
//! exposed by the backing stream service.

pub mod checkpoint;
pub mod identifier;
pub mod shard;
pub mod source;

pub use checkpoint::Checkpoint;
pub use identifier::{InitialPosition, StreamConfig, StreamIdentifier};
pub use shard::{ChildShard, HashKeyRange, ShardDescriptor, ShardInfo};
pub use source::{Record, RecordBatch, ShardIteratorKind, StreamSource};
