//! Per-stream shard sync tasks
//!
//! A sync task lists the stream's shards and reconciles them into the
//! lease table: every shard whose lineage permits processing gets a lease
//! row at the configured initial position. Leases for descendants of a
//! shard still being processed are created later, when the parent reaches
//! shard end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::stream::{
    Checkpoint, InitialPosition, ShardDescriptor, StreamConfig, StreamIdentifier, StreamSource,
};

use super::store::LeaseStore;
use super::{lease_key_for, Lease};

/// Builds the sync task manager for a stream. The default provider wires
/// the shared source and store; tests substitute their own.
pub type ShardSyncTaskManagerProvider =
    Box<dyn Fn(&StreamConfig) -> Arc<ShardSyncTaskManager> + Send + Sync>;

/// Reconciles one stream's shards into the lease table
pub struct ShardSyncTaskManager {
    stream_config: StreamConfig,
    source: Arc<dyn StreamSource>,
    store: Arc<dyn LeaseStore>,
    multi_stream_mode: bool,
    in_flight: Arc<AtomicBool>,
}

impl ShardSyncTaskManager {
    pub fn new(
        stream_config: StreamConfig,
        source: Arc<dyn StreamSource>,
        store: Arc<dyn LeaseStore>,
        multi_stream_mode: bool,
    ) -> Self {
        Self {
            stream_config,
            source,
            store,
            multi_stream_mode,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_identifier(&self) -> &StreamIdentifier {
        &self.stream_config.stream_identifier
    }

    /// Submits a sync to run in the background. Returns false without
    /// submitting if a previous sync for this stream is still running.
    pub fn submit_sync(self: &Arc<Self>) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.run_sync().await {
                warn!(
                    "Shard sync failed for stream {}: {}",
                    manager.stream_identifier(),
                    e
                );
            }
            manager.in_flight.store(false, Ordering::Release);
        });
        true
    }

    /// Runs one sync to completion, propagating the error
    pub async fn execute_sync(&self) -> Result<()> {
        self.run_sync().await
    }

    async fn run_sync(&self) -> Result<()> {
        let stream = &self.stream_config.stream_identifier;
        let shards = self.source.list_shards(stream).await?;
        let stream_key = if self.multi_stream_mode {
            Some(stream)
        } else {
            None
        };

        let existing: HashMap<String, Checkpoint> = self
            .store
            .list_leases()
            .await?
            .into_iter()
            .map(|lease| (lease.lease_key, lease.checkpoint))
            .collect();

        let by_id: HashMap<&str, &ShardDescriptor> =
            shards.iter().map(|s| (s.shard_id.as_str(), s)).collect();

        let mut created = 0usize;
        for shard in &shards {
            let lease_key = lease_key_for(stream_key, &shard.shard_id);
            if existing.contains_key(&lease_key) {
                continue;
            }
            if !self.lineage_permits_lease(shard, stream_key, &existing, &by_id) {
                continue;
            }
            let checkpoint = initial_checkpoint(self.stream_config.initial_position);
            let lease = Lease::new(lease_key, checkpoint).with_parents(shard.parent_shard_ids());
            if self.store.create_lease_if_not_exists(&lease).await? {
                created += 1;
            }
        }

        if created > 0 {
            info!(
                "Shard sync for stream {} created {} lease(s) from {} shard(s)",
                stream,
                created,
                shards.len()
            );
        } else {
            debug!(
                "Shard sync for stream {} found {} shard(s), no new leases",
                stream,
                shards.len()
            );
        }
        Ok(())
    }

    /// A shard may be leased only when none of its ancestors still has
    /// unfinished processing: each parent must either hold a lease
    /// already at shard end, or be gone from both the table and the
    /// listing.
    fn lineage_permits_lease(
        &self,
        shard: &ShardDescriptor,
        stream_key: Option<&StreamIdentifier>,
        existing: &HashMap<String, Checkpoint>,
        by_id: &HashMap<&str, &ShardDescriptor>,
    ) -> bool {
        for parent_id in shard.parent_shard_ids() {
            let parent_key = lease_key_for(stream_key, &parent_id);
            match existing.get(&parent_key) {
                Some(checkpoint) if checkpoint.is_shard_end() => continue,
                // Parent still mid-processing; its consumer hands off to
                // children at shard end.
                Some(_) => return false,
                // Parent listed but never leased: it must be leased first.
                None if by_id.contains_key(parent_id.as_str()) => return false,
                None => continue,
            }
        }
        true
    }
}

fn initial_checkpoint(position: InitialPosition) -> Checkpoint {
    match position {
        InitialPosition::Latest => Checkpoint::Latest,
        InitialPosition::TrimHorizon => Checkpoint::TrimHorizon,
        InitialPosition::AtTimestamp(_) => Checkpoint::AtTimestamp,
    }
}

/// Per-stream cache of sync task managers, shared between the scheduler
/// and the periodic sync manager
pub struct ShardSyncTaskManagerCache {
    provider: ShardSyncTaskManagerProvider,
    managers: Mutex<HashMap<StreamIdentifier, Arc<ShardSyncTaskManager>>>,
}

impl ShardSyncTaskManagerCache {
    pub fn new(provider: ShardSyncTaskManagerProvider) -> Self {
        Self {
            provider,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Cache wired directly to a source and store
    pub fn direct(
        source: Arc<dyn StreamSource>,
        store: Arc<dyn LeaseStore>,
        multi_stream_mode: bool,
    ) -> Self {
        Self::new(Box::new(move |config| {
            Arc::new(ShardSyncTaskManager::new(
                config.clone(),
                Arc::clone(&source),
                Arc::clone(&store),
                multi_stream_mode,
            ))
        }))
    }

    /// Returns the manager for a stream, constructing it on first use
    pub fn for_stream(&self, config: &StreamConfig) -> Arc<ShardSyncTaskManager> {
        let mut managers = self.managers.lock();
        managers
            .entry(config.stream_identifier.clone())
            .or_insert_with(|| (self.provider)(config))
            .clone()
    }

    /// Drops the cached manager for a retired stream
    pub fn evict(&self, stream_identifier: &StreamIdentifier) {
        self.managers.lock().remove(stream_identifier);
    }
}
