//! In-memory lease table
//!
//! Reference `LeaseStore` for tests and single-process deployments.
//! Enforces the same conditional-write discipline a durable table would.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CoordinatorError, Result};

use super::store::{LeaseStore, UpdateField};
use super::Lease;

/// Conditionally-updating lease table backed by process memory
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<BTreeMap<String, Lease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leases currently held
    pub fn len(&self) -> usize {
        self.leases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.read().is_empty()
    }

    /// Inserts a lease unconditionally; test seam for pre-populating state
    pub fn put(&self, lease: Lease) {
        self.leases.write().insert(lease.lease_key.clone(), lease);
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn list_leases(&self) -> Result<Vec<Lease>> {
        Ok(self.leases.read().values().cloned().collect())
    }

    async fn get_lease(&self, lease_key: &str) -> Result<Option<Lease>> {
        Ok(self.leases.read().get(lease_key).cloned())
    }

    async fn create_lease_if_not_exists(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.leases.write();
        if leases.contains_key(&lease.lease_key) {
            return Ok(false);
        }
        debug!("Creating lease {}", lease.lease_key);
        leases.insert(lease.lease_key.clone(), lease.clone());
        Ok(true)
    }

    async fn delete_lease(&self, lease: &Lease) -> Result<()> {
        self.leases.write().remove(&lease.lease_key);
        Ok(())
    }

    async fn update_lease_with_meta_info(&self, lease: &Lease, field: UpdateField) -> Result<()> {
        let mut leases = self.leases.write();
        let row = leases
            .get_mut(&lease.lease_key)
            .ok_or_else(|| CoordinatorError::LeaseNotFound {
                lease_key: lease.lease_key.clone(),
            })?;
        if row.lease_counter != lease.lease_counter {
            return Err(CoordinatorError::LeaseConflict {
                lease_key: lease.lease_key.clone(),
                expected_counter: lease.lease_counter,
            });
        }
        match field {
            UpdateField::ChildShards => row.child_shard_ids = lease.child_shard_ids.clone(),
            UpdateField::PendingCheckpoint => {
                row.pending_checkpoint = lease.pending_checkpoint.clone()
            }
        }
        Ok(())
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.leases.write();
        match leases.get_mut(&lease.lease_key) {
            Some(row) if row.lease_counter == lease.lease_counter => {
                row.lease_counter += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoordinatorError::LeaseNotFound {
                lease_key: lease.lease_key.clone(),
            }),
        }
    }

    async fn take_lease(&self, lease: &Lease, new_owner: &str) -> Result<Lease> {
        let mut leases = self.leases.write();
        let row = leases
            .get_mut(&lease.lease_key)
            .ok_or_else(|| CoordinatorError::LeaseNotFound {
                lease_key: lease.lease_key.clone(),
            })?;
        if row.lease_counter != lease.lease_counter {
            return Err(CoordinatorError::LeaseConflict {
                lease_key: lease.lease_key.clone(),
                expected_counter: lease.lease_counter,
            });
        }
        row.owner = Some(new_owner.to_string());
        row.lease_counter += 1;
        Ok(row.clone())
    }
}
