//! Positions within a shard
//!
//! A checkpoint is either a well-known sentinel or a concrete sequence
//! number with an optional sub-sequence for records split across
//! aggregated batches.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Extended sequence number: sentinel or concrete position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Begin at the oldest retained record
    TrimHorizon,
    /// Begin at the newest record
    Latest,
    /// Begin at a configured timestamp
    AtTimestamp,
    /// The shard is closed and fully processed
    ShardEnd,
    /// A concrete position within the shard
    Sequence {
        sequence_number: String,
        sub_sequence_number: Option<u64>,
    },
}

impl Checkpoint {
    /// Builds a concrete sequence checkpoint
    pub fn sequence(sequence_number: impl Into<String>) -> Self {
        Checkpoint::Sequence {
            sequence_number: sequence_number.into(),
            sub_sequence_number: None,
        }
    }

    /// Builds a concrete sequence checkpoint with a sub-sequence
    pub fn sub_sequence(sequence_number: impl Into<String>, sub_sequence_number: u64) -> Self {
        Checkpoint::Sequence {
            sequence_number: sequence_number.into(),
            sub_sequence_number: Some(sub_sequence_number),
        }
    }

    /// Returns true once the shard has been processed to its end
    pub fn is_shard_end(&self) -> bool {
        matches!(self, Checkpoint::ShardEnd)
    }

    /// Returns true while the holder has not yet begun processing.
    ///
    /// A lease still parked at `TrimHorizon` or `AtTimestamp` has consumed
    /// nothing; parent leases must not be reaped under it.
    pub fn is_unbegun(&self) -> bool {
        matches!(self, Checkpoint::TrimHorizon | Checkpoint::AtTimestamp)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::TrimHorizon => f.write_str("TRIM_HORIZON"),
            Checkpoint::Latest => f.write_str("LATEST"),
            Checkpoint::AtTimestamp => f.write_str("AT_TIMESTAMP"),
            Checkpoint::ShardEnd => f.write_str("SHARD_END"),
            Checkpoint::Sequence {
                sequence_number,
                sub_sequence_number: None,
            } => write!(f, "{sequence_number}"),
            Checkpoint::Sequence {
                sequence_number,
                sub_sequence_number: Some(sub),
            } => write!(f, "{sequence_number}.{sub}"),
        }
    }
}
