//! Lease table abstraction
//!
//! A persistent, conditionally-updatable table of leases. Every mutating
//! operation is conditional on the lease counter so two workers can never
//! both win the same write.

use async_trait::async_trait;

use crate::error::Result;

use super::Lease;

/// Field targeted by a metadata-only conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateField {
    ChildShards,
    PendingCheckpoint,
}

/// Persistent lease table
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Lists every lease in the table
    async fn list_leases(&self) -> Result<Vec<Lease>>;

    /// Fetches a lease by key
    async fn get_lease(&self, lease_key: &str) -> Result<Option<Lease>>;

    /// Creates the lease if no row exists for its key. Returns true if
    /// the row was created, false if it already existed.
    async fn create_lease_if_not_exists(&self, lease: &Lease) -> Result<bool>;

    /// Deletes the lease row
    async fn delete_lease(&self, lease: &Lease) -> Result<()>;

    /// Updates a single metadata field, conditional on the lease counter
    async fn update_lease_with_meta_info(&self, lease: &Lease, field: UpdateField) -> Result<()>;

    /// Extends the holder's claim, conditional on the lease counter.
    /// Returns false if the lease was taken by another worker.
    async fn renew_lease(&self, lease: &Lease) -> Result<bool>;

    /// Transfers ownership to `new_owner`, bumping the counter
    async fn take_lease(&self, lease: &Lease, new_owner: &str) -> Result<Lease>;
}
