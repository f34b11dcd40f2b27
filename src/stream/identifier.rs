//! Stream identity and per-stream configuration
//!
//! A stream is addressed either by a bare name (single-stream mode) or by
//! the triple `account:name:creation-epoch` (multi-stream mode). The
//! canonical string form is the join of the components with `:`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Identity of a stream being consumed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamIdentifier {
    /// A bare stream name, used when the worker consumes a single stream
    Single { stream_name: String },
    /// Fully qualified identity for multi-stream deployments
    Multi {
        account_id: String,
        stream_name: String,
        creation_epoch: u64,
    },
}

impl StreamIdentifier {
    /// Builds a single-stream identifier from a bare name
    pub fn single(stream_name: impl Into<String>) -> Self {
        StreamIdentifier::Single {
            stream_name: stream_name.into(),
        }
    }

    /// Builds a multi-stream identifier from its components
    pub fn multi(
        account_id: impl Into<String>,
        stream_name: impl Into<String>,
        creation_epoch: u64,
    ) -> Self {
        StreamIdentifier::Multi {
            account_id: account_id.into(),
            stream_name: stream_name.into(),
            creation_epoch,
        }
    }

    /// Parses the canonical `account:name:epoch` form
    pub fn parse_multi(serialized: &str) -> Result<Self, CoordinatorError> {
        let parts: Vec<&str> = serialized.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(CoordinatorError::InvalidIdentifier {
                message: format!("expected account:name:epoch, got {serialized:?}"),
            });
        }
        let creation_epoch: u64 =
            parts[2]
                .parse()
                .map_err(|_| CoordinatorError::InvalidIdentifier {
                    message: format!("creation epoch {:?} is not a number", parts[2]),
                })?;
        Ok(StreamIdentifier::Multi {
            account_id: parts[0].to_string(),
            stream_name: parts[1].to_string(),
            creation_epoch,
        })
    }

    /// Canonical string form; inverse of [`StreamIdentifier::parse_multi`]
    /// for multi-stream identifiers
    pub fn serialize(&self) -> String {
        match self {
            StreamIdentifier::Single { stream_name } => stream_name.clone(),
            StreamIdentifier::Multi {
                account_id,
                stream_name,
                creation_epoch,
            } => format!("{account_id}:{stream_name}:{creation_epoch}"),
        }
    }

    /// Bare stream name without account or epoch qualifiers
    pub fn stream_name(&self) -> &str {
        match self {
            StreamIdentifier::Single { stream_name } => stream_name,
            StreamIdentifier::Multi { stream_name, .. } => stream_name,
        }
    }

    /// Returns true for the fully qualified multi-stream form
    pub fn is_multi(&self) -> bool {
        matches!(self, StreamIdentifier::Multi { .. })
    }
}

impl fmt::Display for StreamIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Where consumption of a newly discovered shard begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialPosition {
    /// Start at the newest record
    Latest,
    /// Start at the oldest retained record
    TrimHorizon,
    /// Start at the record nearest the given timestamp
    AtTimestamp(DateTime<Utc>),
}

/// Per-stream consumption configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_identifier: StreamIdentifier,
    pub initial_position: InitialPosition,
}

impl StreamConfig {
    pub fn new(stream_identifier: StreamIdentifier, initial_position: InitialPosition) -> Self {
        Self {
            stream_identifier,
            initial_position,
        }
    }
}
