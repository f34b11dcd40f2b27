//! Error types for the coordination runtime
//!
//! Taxonomy covering source, lease-store, scheduling, and lifecycle
//! failures. Dependency-shaped errors are retryable; invalid-state
//! errors surface a store contract violation and are not.

use std::time::Duration;

use thiserror::Error;

/// Primary error type for all coordination operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    // ========== Source Errors ==========
    /// Transient failure talking to the stream source
    #[error("stream source call failed: {message}")]
    Dependency { message: String },

    /// The source throttled the caller
    #[error("provisioned throughput exceeded: {message}")]
    ProvisionedThroughput { message: String },

    /// The source no longer knows the shard or stream
    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: String },

    /// A bounded source call did not resolve in time
    #[error("source call timed out after {waited:?}")]
    FutureTimedOut { waited: Duration },

    // ========== Lease Errors ==========
    /// The lease table violated its contract
    #[error("invalid lease table state: {message}")]
    InvalidState { message: String },

    /// Conditional write lost against a concurrent writer
    #[error("lease {lease_key} was modified concurrently (expected counter {expected_counter})")]
    LeaseConflict {
        lease_key: String,
        expected_counter: u64,
    },

    /// Lease lookup for a key that must exist came back empty
    #[error("lease {lease_key} not found")]
    LeaseNotFound { lease_key: String },

    // ========== Scheduling Errors ==========
    /// The consumer executor refused new work
    #[error("consumer executor saturated: {active} active of {capacity} slots")]
    RejectedTask { active: usize, capacity: usize },

    /// A unit of work failed in a way that should not be retried
    #[error("non-retryable failure: {message}")]
    NonRetryable { message: String },

    // ========== Lifecycle Errors ==========
    /// Initialization exhausted its retry allowance
    #[error("initialization failed after {attempts} attempt(s): {last_error}")]
    InitializationFailed { attempts: u32, last_error: String },

    /// Operation arrived after shutdown was requested
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// A malformed identifier or key was supplied
    #[error("invalid identifier: {message}")]
    InvalidIdentifier { message: String },
}

impl CoordinatorError {
    /// Returns true if the operation may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Dependency { .. }
                | CoordinatorError::ProvisionedThroughput { .. }
                | CoordinatorError::FutureTimedOut { .. }
                | CoordinatorError::LeaseConflict { .. }
        )
    }

    /// Returns true if the source positively reported the resource gone
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, CoordinatorError::ResourceNotFound { .. })
    }

    /// Returns true if this is an executor-saturation rejection
    pub fn is_rejected_task(&self) -> bool {
        matches!(self, CoordinatorError::RejectedTask { .. })
    }
}

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
