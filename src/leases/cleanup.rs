//! Deferred deletion of completed and garbage shard leases
//!
//! Consumers enqueue a lease here when they observe shard end or a
//! resource-not-found from the source. A background tick drains the
//! queue and deletes leases subject to lineage constraints: a completed
//! shard's lease goes only after its parents are gone and all of its
//! children have begun processing; a garbage lease goes only on positive
//! evidence (the source reports the shard missing).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::metrics::standard;
use crate::runtime::ShutdownSignal;
use crate::stream::{ShardInfo, StreamIdentifier, StreamSource};

use super::store::{LeaseStore, UpdateField};
use super::Lease;

/// Records fetched when probing a shard for its children
const MAX_RECORDS: usize = 1;

/// Cleanup cadences and gates
#[derive(Debug, Clone)]
pub struct LeaseCleanupConfig {
    /// How often the cleanup tick runs
    pub lease_cleanup_interval: Duration,
    /// Minimum spacing between completed-shard reap attempts
    pub completed_lease_cleanup_interval: Duration,
    /// Minimum spacing between garbage-shard reap attempts
    pub garbage_lease_cleanup_interval: Duration,
    /// Gates the completed-shard path entirely
    pub cleanup_leases_upon_shard_completion: bool,
    /// Bound on each source call made while probing
    pub max_future_wait: Duration,
}

impl Default for LeaseCleanupConfig {
    fn default() -> Self {
        Self {
            lease_cleanup_interval: Duration::from_secs(60),
            completed_lease_cleanup_interval: Duration::from_secs(300),
            garbage_lease_cleanup_interval: Duration::from_secs(1800),
            cleanup_leases_upon_shard_completion: true,
            max_future_wait: Duration::from_secs(30),
        }
    }
}

/// A lease waiting for deferred deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasePendingDeletion {
    pub stream_identifier: StreamIdentifier,
    pub lease: Lease,
    pub shard_info: ShardInfo,
}

/// Outcome of one cleanup attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaseCleanupResult {
    pub cleaned_up_completed_lease: bool,
    pub cleaned_up_garbage_lease: bool,
}

impl LeaseCleanupResult {
    pub fn lease_cleaned_up(&self) -> bool {
        self.cleaned_up_completed_lease || self.cleaned_up_garbage_lease
    }
}

/// Interval gate that restarts only when its path made progress
struct Stopwatch {
    started_at: Mutex<Instant>,
}

impl Stopwatch {
    fn new() -> Self {
        Self {
            started_at: Mutex::new(Instant::now()),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started_at.lock().elapsed()
    }

    fn reset(&self) {
        *self.started_at.lock() = Instant::now();
    }
}

/// Reaps leases of completed and vanished shards
pub struct LeaseCleanupManager {
    store: Arc<dyn LeaseStore>,
    source: Arc<dyn StreamSource>,
    config: LeaseCleanupConfig,
    deletion_queue: Mutex<VecDeque<LeasePendingDeletion>>,
    completed_lease_stopwatch: Stopwatch,
    garbage_lease_stopwatch: Stopwatch,
    is_running: AtomicBool,
    shutdown: ShutdownSignal,
}

impl LeaseCleanupManager {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        source: Arc<dyn StreamSource>,
        config: LeaseCleanupConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
            deletion_queue: Mutex::new(VecDeque::new()),
            completed_lease_stopwatch: Stopwatch::new(),
            garbage_lease_stopwatch: Stopwatch::new(),
            is_running: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Starts the cleanup tick. Double-start is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Starting lease cleanup task.");
        self.completed_lease_stopwatch.reset();
        self.garbage_lease_stopwatch.reset();

        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                manager.cleanup_leases().await;
                tokio::select! {
                    _ = tokio::time::sleep(manager.config.lease_cleanup_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Stops the cleanup tick. Idempotent.
    pub fn stop(&self) {
        if self.is_running.swap(false, Ordering::AcqRel) {
            self.shutdown.shutdown();
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Enqueues a lease for deferred deletion. Identical entries already
    /// waiting are rejected. Returns true if the entry was admitted.
    pub fn enqueue_for_deletion(&self, pending: LeasePendingDeletion) -> bool {
        let mut queue = self.deletion_queue.lock();
        if queue.contains(&pending) {
            warn!(
                "Lease {} is already pending deletion, not enqueueing.",
                pending.lease.lease_key
            );
            return false;
        }
        debug!(
            "Enqueuing lease {} for deferred deletion.",
            pending.lease.lease_key
        );
        queue.push_back(pending);
        standard::LEASES_PENDING_DELETION.set(queue.len() as i64);
        true
    }

    /// Number of leases currently waiting for deletion
    pub fn leases_pending_deletion(&self) -> usize {
        self.deletion_queue.lock().len()
    }

    fn time_to_check_completed_shard(&self) -> bool {
        self.completed_lease_stopwatch.elapsed() >= self.config.completed_lease_cleanup_interval
    }

    fn time_to_check_garbage_shard(&self) -> bool {
        self.garbage_lease_stopwatch.elapsed() >= self.config.garbage_lease_cleanup_interval
    }

    /// One cleanup tick: drains the queue, re-enqueueing entries that
    /// could not be cleaned yet.
    pub async fn cleanup_leases(&self) {
        if self.deletion_queue.lock().is_empty() {
            debug!("No leases pending deletion.");
            return;
        }
        if !self.time_to_check_completed_shard() && !self.time_to_check_garbage_shard() {
            return;
        }
        let mut pending: VecDeque<LeasePendingDeletion> =
            std::mem::take(&mut *self.deletion_queue.lock());

        debug!("Attempting to clean up {} lease(s).", pending.len());

        let mut failed: VecDeque<LeasePendingDeletion> = VecDeque::new();
        let mut completed_lease_cleaned_up = false;
        let mut garbage_lease_cleaned_up = false;

        while let Some(entry) = pending.pop_front() {
            let lease_key = entry.lease.lease_key.clone();
            let stream = entry.stream_identifier.clone();
            let mut deletion_failed = true;

            match self.cleanup_lease(&entry).await {
                Ok(result) => {
                    completed_lease_cleaned_up |= result.cleaned_up_completed_lease;
                    garbage_lease_cleaned_up |= result.cleaned_up_garbage_lease;
                    if result.lease_cleaned_up() {
                        debug!("Successfully cleaned up lease {} for {}", lease_key, stream);
                        deletion_failed = false;
                    }
                }
                Err(e) => {
                    error!(
                        "Failed to clean up lease {} for {}: {}. Re-enqueueing for retry on the next tick.",
                        lease_key, stream, e
                    );
                }
            }

            if deletion_failed {
                debug!(
                    "Did not clean up lease {} for {}. Re-enqueueing for deletion.",
                    lease_key, stream
                );
                failed.push_back(entry);
            }
        }

        if completed_lease_cleaned_up {
            debug!("At least one completed lease was cleaned up - restarting interval");
            self.completed_lease_stopwatch.reset();
        }
        if garbage_lease_cleaned_up {
            debug!("At least one garbage lease was cleaned up - restarting interval");
            self.garbage_lease_stopwatch.reset();
        }

        let mut queue = self.deletion_queue.lock();
        queue.extend(failed);
        standard::LEASES_PENDING_DELETION.set(queue.len() as i64);
    }

    /// Attempts one deletion, walking the completed-shard path first and
    /// falling back to the garbage path on resource-not-found evidence.
    pub async fn cleanup_lease(&self, entry: &LeasePendingDeletion) -> Result<LeaseCleanupResult> {
        let lease = &entry.lease;
        let shard_info = &entry.shard_info;
        let stream = &entry.stream_identifier;

        let mut result = LeaseCleanupResult::default();
        let mut already_probed_source = false;

        if self.config.cleanup_leases_upon_shard_completion && self.time_to_check_completed_shard()
        {
            let current = match self.store.get_lease(&lease.lease_key).await? {
                Some(current) => current,
                None => {
                    // Another worker already reaped it; nothing left to do.
                    debug!("Lease {} already deleted.", lease.lease_key);
                    result.cleaned_up_completed_lease = true;
                    return Ok(result);
                }
            };

            let mut child_shard_keys = current.child_shard_ids.clone();
            if child_shard_keys.is_empty() {
                match self.child_shard_keys_from_source(shard_info, stream).await {
                    Ok(keys) => {
                        already_probed_source = true;
                        if keys.is_empty() {
                            error!(
                                "No child shards returned from source for shard {} of {}.",
                                shard_info.shard_id, stream
                            );
                        } else {
                            self.update_lease_with_child_shards(&current, keys.clone())
                                .await?;
                            child_shard_keys = keys;
                        }
                    }
                    Err(e) if e.is_resource_not_found() => {
                        result.cleaned_up_garbage_lease =
                            self.cleanup_lease_for_garbage_shard(lease).await?;
                        return Ok(result);
                    }
                    Err(e) => return Err(e),
                }
            }

            if !child_shard_keys.is_empty() {
                result.cleaned_up_completed_lease = self
                    .cleanup_lease_for_completed_shard(lease, shard_info, &child_shard_keys)
                    .await?;
            }
        }

        if !already_probed_source && self.time_to_check_garbage_shard() {
            match self.child_shard_keys_from_source(shard_info, stream).await {
                Ok(_) => {}
                Err(e) if e.is_resource_not_found() => {
                    result.cleaned_up_garbage_lease =
                        self.cleanup_lease_for_garbage_shard(lease).await?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }

    /// Probes the source for the shard's children by opening a LATEST
    /// iterator and reading a single record. Child shard ids are mapped
    /// to lease keys in the owning stream.
    async fn child_shard_keys_from_source(
        &self,
        shard_info: &ShardInfo,
        stream: &StreamIdentifier,
    ) -> Result<Vec<String>> {
        let iterator = self
            .bounded(self.source.get_shard_iterator(
                stream,
                &shard_info.shard_id,
                crate::stream::ShardIteratorKind::Latest,
            ))
            .await?;
        let batch = self
            .bounded(self.source.get_records(&iterator, MAX_RECORDS))
            .await?;
        Ok(batch
            .child_shards
            .iter()
            .map(|child| shard_info.lease_key_for_sibling(&child.shard_id))
            .collect())
    }

    /// Bounds a source call by `max_future_wait`
    async fn bounded<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.max_future_wait, future).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::FutureTimedOut {
                waited: self.config.max_future_wait,
            }),
        }
    }

    /// The shard no longer exists in the stream, so its lease is safe to
    /// delete regardless of lineage.
    async fn cleanup_lease_for_garbage_shard(&self, lease: &Lease) -> Result<bool> {
        info!(
            "Deleting lease {} as it is not present in the stream.",
            lease.lease_key
        );
        self.store.delete_lease(lease).await?;
        standard::GARBAGE_LEASES_CLEANED.inc();
        Ok(true)
    }

    async fn all_parent_shard_leases_deleted(
        &self,
        lease: &Lease,
        shard_info: &ShardInfo,
    ) -> Result<bool> {
        for parent_shard_id in &lease.parent_shard_ids {
            let parent_key = shard_info.lease_key_for_sibling(parent_shard_id);
            if self.store.get_lease(&parent_key).await?.is_some() {
                warn!(
                    "Lease {} has a parent lease {} still present in the lease table, skipping deletion.",
                    lease.lease_key, parent_key
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deletes the completed shard's lease only when its parent leases
    /// are already gone and every child lease has begun processing.
    async fn cleanup_lease_for_completed_shard(
        &self,
        lease: &Lease,
        shard_info: &ShardInfo,
        child_shard_keys: &[String],
    ) -> Result<bool> {
        for child_shard_key in child_shard_keys {
            let child_lease = self.store.get_lease(child_shard_key).await?.ok_or_else(|| {
                CoordinatorError::InvalidState {
                    message: format!(
                        "child lease {} for completed shard not found in lease table - not cleaning up lease {}",
                        child_shard_key, lease.lease_key
                    ),
                }
            })?;
            if child_lease.checkpoint.is_unbegun() {
                return Ok(false);
            }
        }

        if !self.all_parent_shard_leases_deleted(lease, shard_info).await? {
            return Ok(false);
        }

        info!(
            "Deleting lease {} as it has been completely processed and processing of child shard(s) has begun.",
            lease.lease_key
        );
        self.store.delete_lease(lease).await?;
        standard::COMPLETED_LEASES_CLEANED.inc();
        Ok(true)
    }

    async fn update_lease_with_child_shards(
        &self,
        current: &Lease,
        child_shard_keys: Vec<String>,
    ) -> Result<()> {
        let updated = current.clone().with_children(child_shard_keys);
        self.store
            .update_lease_with_meta_info(&updated, UpdateField::ChildShards)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leases::InMemoryLeaseStore;
    use crate::stream::{Checkpoint, RecordBatch, ShardDescriptor, ShardIteratorKind};
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl StreamSource for EmptySource {
        async fn list_shards(&self, _stream: &StreamIdentifier) -> Result<Vec<ShardDescriptor>> {
            Ok(vec![])
        }

        async fn get_shard_iterator(
            &self,
            _stream: &StreamIdentifier,
            _shard_id: &str,
            _kind: ShardIteratorKind,
        ) -> Result<String> {
            Ok("iterator".into())
        }

        async fn get_records(&self, _iterator: &str, _limit: usize) -> Result<RecordBatch> {
            Ok(RecordBatch::default())
        }
    }

    fn pending(lease_key: &str) -> LeasePendingDeletion {
        LeasePendingDeletion {
            stream_identifier: StreamIdentifier::single("orders"),
            lease: Lease::new(lease_key, Checkpoint::ShardEnd),
            shard_info: ShardInfo::new(lease_key, "token", vec![], Checkpoint::ShardEnd),
        }
    }

    fn manager() -> Arc<LeaseCleanupManager> {
        Arc::new(LeaseCleanupManager::new(
            Arc::new(InMemoryLeaseStore::new()),
            Arc::new(EmptySource),
            LeaseCleanupConfig::default(),
        ))
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let manager = manager();
        assert!(manager.enqueue_for_deletion(pending("shardId-0001")));
        assert!(!manager.enqueue_for_deletion(pending("shardId-0001")));
        assert_eq!(manager.leases_pending_deletion(), 1);

        assert!(manager.enqueue_for_deletion(pending("shardId-0002")));
        assert_eq!(manager.leases_pending_deletion(), 2);
    }

    #[tokio::test]
    async fn tick_is_a_no_op_before_either_gate_elapses() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let config = LeaseCleanupConfig {
            completed_lease_cleanup_interval: Duration::from_secs(3600),
            garbage_lease_cleanup_interval: Duration::from_secs(3600),
            ..LeaseCleanupConfig::default()
        };
        let manager = Arc::new(LeaseCleanupManager::new(
            Arc::clone(&store) as _,
            Arc::new(EmptySource),
            config,
        ));
        store.put(Lease::new("shardId-0001", Checkpoint::ShardEnd));
        manager.enqueue_for_deletion(pending("shardId-0001"));

        manager.cleanup_leases().await;

        assert_eq!(manager.leases_pending_deletion(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let manager = manager();
        manager.start();
        manager.start();
        assert!(manager.is_running());
        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
    }
}
