//! Leader-elected periodic shard sync
//!
//! On the fleet's leader, a fixed-delay timer walks every tracked stream
//! and submits its shard sync task, keeping the lease table in step with
//! shards created by splits and merges. Non-leaders tick but do nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::leases::{decode_multi_stream_lease_key, Lease, LeaseStore, ShardSyncTaskManagerCache};
use crate::metrics::standard;
use crate::runtime::ShutdownSignal;
use crate::stream::{StreamConfig, StreamIdentifier};

use super::leader::LeaderDecider;

/// Orchestrates periodic shard sync across tracked streams
pub struct PeriodicShardSyncManager {
    worker_id: String,
    leader_decider: Arc<dyn LeaderDecider>,
    lease_store: Arc<dyn LeaseStore>,
    stream_configs: Arc<RwLock<HashMap<StreamIdentifier, StreamConfig>>>,
    sync_managers: Arc<ShardSyncTaskManagerCache>,
    multi_stream_mode: bool,
    initial_delay: Duration,
    period: Duration,
    is_running: AtomicBool,
    lifecycle: Mutex<()>,
    shutdown: ShutdownSignal,
}

impl PeriodicShardSyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: impl Into<String>,
        leader_decider: Arc<dyn LeaderDecider>,
        lease_store: Arc<dyn LeaseStore>,
        stream_configs: Arc<RwLock<HashMap<StreamIdentifier, StreamConfig>>>,
        sync_managers: Arc<ShardSyncTaskManagerCache>,
        multi_stream_mode: bool,
        initial_delay: Duration,
        period: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            leader_decider,
            lease_store,
            stream_configs,
            sync_managers,
            multi_stream_mode,
            initial_delay,
            period,
            is_running: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Starts the fixed-delay sync timer. Double-start is a no-op.
    pub fn start(self: &Arc<Self>) {
        let _guard = self.lifecycle.lock();
        if self.is_running.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(manager.initial_delay) => {}
                _ = shutdown_rx.recv() => return,
            }
            loop {
                manager.run_shard_sync().await;
                // fixed delay, not fixed rate: a slow sync never overlaps
                // its successor
                tokio::select! {
                    _ = tokio::time::sleep(manager.period) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Stops the timer and releases the leader decider. Idempotent.
    pub fn stop(&self) {
        let _guard = self.lifecycle.lock();
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(
            "Shutting down leader decider on worker {}",
            self.worker_id
        );
        self.leader_decider.shutdown();
        info!(
            "Shutting down periodic shard sync timer on worker {}",
            self.worker_id
        );
        self.shutdown.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// One timer tick. Failures are logged and never kill the timer.
    pub async fn run_shard_sync(&self) {
        if !self.leader_decider.is_leader(&self.worker_id) {
            debug!(
                "Worker {} is not the leader, skipping the shard sync task",
                self.worker_id
            );
            return;
        }
        if let Err(e) = self.sync_all_streams().await {
            error!("Error during periodic shard sync: {}", e);
        }
    }

    async fn sync_all_streams(&self) -> Result<()> {
        let tracked: HashMap<StreamIdentifier, StreamConfig> = self.stream_configs.read().clone();
        let stream_to_leases = self.stream_to_leases_map(&tracked).await?;

        for (stream, config) in &tracked {
            let leases = stream_to_leases
                .get(stream)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if !Self::hash_range_complete(leases) {
                debug!(
                    "Stream {} has {} lease(s); hash range coverage not verified",
                    stream,
                    leases.len()
                );
            }

            let manager = self.sync_managers.for_stream(config);
            if manager.submit_sync() {
                standard::SHARD_SYNCS_SUBMITTED.inc();
            } else {
                warn!(
                    "Failed to submit shard sync task for stream {}. This could be due to the previous shard sync task not finished.",
                    stream
                );
            }
        }
        Ok(())
    }

    /// Runs one blocking sync pass over every tracked stream, without
    /// scheduling anything. The first task error is propagated.
    pub async fn sync_shards_once(&self) -> Result<()> {
        let tracked: HashMap<StreamIdentifier, StreamConfig> = self.stream_configs.read().clone();
        for (stream, config) in &tracked {
            info!("Syncing shard info for {}", stream);
            let manager = self.sync_managers.for_stream(config);
            manager.execute_sync().await?;
        }
        Ok(())
    }

    /// Groups all leases by their owning stream. Single-stream mode maps
    /// the sole stream to every lease; multi-stream mode decodes each
    /// lease key and drops leases of untracked streams.
    async fn stream_to_leases_map(
        &self,
        tracked: &HashMap<StreamIdentifier, StreamConfig>,
    ) -> Result<HashMap<StreamIdentifier, Vec<Lease>>> {
        let leases = self.lease_store.list_leases().await?;
        if !self.multi_stream_mode {
            debug_assert_eq!(tracked.len(), 1);
            return Ok(tracked
                .keys()
                .next()
                .map(|stream| (stream.clone(), leases))
                .into_iter()
                .collect());
        }

        let mut map: HashMap<StreamIdentifier, Vec<Lease>> = HashMap::new();
        for lease in leases {
            if let Some((stream, _)) = decode_multi_stream_lease_key(&lease.lease_key) {
                if tracked.contains_key(&stream) {
                    map.entry(stream).or_default().push(lease);
                }
            }
        }
        Ok(map)
    }

    /// Whether the leases' shards cover the stream's entire hash range.
    // TODO: fold the shard hash ranges recorded at sync time and compare
    // against the full keyspace; leases do not carry ranges yet.
    pub fn hash_range_complete(leases: &[Lease]) -> bool {
        if leases.is_empty() {
            return false;
        }
        false
    }
}
