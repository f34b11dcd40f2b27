//! Worker-local scheduler loop
//!
//! Diffs the worker's current lease assignments against its live shard
//! consumers, creating consumers for newly assigned shards and retiring
//! displaced ones. In multi-stream mode it also reconciles the tracked
//! stream set, deferring removal of streams the tracker no longer
//! declares. Initialization, the process loop, and shutdown all run on
//! whatever task the embedder drives `run()` from; background work lives
//! in the periodic sync and lease cleanup managers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::consumer::{Checkpointer, ShardConsumer, ShardConsumerFactory};
use crate::error::{CoordinatorError, Result};
use crate::leases::{
    LeaseCleanupConfig, LeaseCleanupManager, LeaseCoordinator, LeaseStore,
    ShardSyncTaskManagerCache,
};
use crate::metrics::standard;
use crate::runtime::{ConsumerExecutor, ExecutorConfig, ShutdownSignal};
use crate::stream::{ShardInfo, StreamConfig, StreamIdentifier, StreamSource};

use super::diagnostics::{
    DiagnosticEventHandler, LoggingDiagnosticEventHandler, UndeliverableErrorSink,
};
use super::leader::LeaderDecider;
use super::registry::ShardConsumerRegistry;
use super::shard_sync::PeriodicShardSyncManager;
use super::worker_state::{
    NoOpWorkerStateChangeListener, WorkerState, WorkerStateChangeListener,
};

/// Declares the set of streams a multi-stream worker should consume
pub trait MultiStreamTracker: Send + Sync {
    /// Current declared streams; re-read at every reconcile
    fn stream_config_list(&self) -> Vec<StreamConfig>;
}

/// Where the scheduler learns which streams to consume
pub enum StreamTracker {
    /// One fixed stream
    Single(StreamConfig),
    /// A tracker that may add and remove streams over time
    Multi(Arc<dyn MultiStreamTracker>),
}

impl StreamTracker {
    pub fn is_multi_stream(&self) -> bool {
        matches!(self, StreamTracker::Multi(_))
    }

    fn stream_configs(&self) -> Vec<StreamConfig> {
        match self {
            StreamTracker::Single(config) => vec![config.clone()],
            StreamTracker::Multi(tracker) => tracker.stream_config_list(),
        }
    }
}

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Logical worker identity reported in logs and metrics
    pub application_name: String,
    /// Unique id of this worker within the fleet
    pub worker_id: String,
    /// Process-loop period
    pub parent_shard_poll_interval: Duration,
    /// Bound on initialization attempts before `run` gives up
    pub max_initialization_attempts: u32,
    /// Delay before the periodic shard sync's first tick
    pub shard_sync_initial_delay: Duration,
    /// Periodic shard sync interval
    pub periodic_shard_sync_interval: Duration,
    /// How long a stream must stay absent from the tracker before its
    /// state is dropped
    pub old_stream_deferred_deletion_period: Duration,
    /// Spacing of tracker reconciliation checks in the process loop
    pub new_stream_check_interval: Duration,
    /// Upper bound on waiting for consumers during shutdown
    pub graceful_shutdown_timeout: Duration,
    pub cleanup: LeaseCleanupConfig,
    pub executor: ExecutorConfig,
}

impl SchedulerConfig {
    pub fn new(application_name: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            worker_id: worker_id.into(),
            parent_shard_poll_interval: Duration::from_millis(
                crate::DEFAULT_PARENT_SHARD_POLL_INTERVAL_MILLIS,
            ),
            max_initialization_attempts: crate::DEFAULT_MAX_INITIALIZATION_ATTEMPTS,
            shard_sync_initial_delay: Duration::from_millis(
                crate::DEFAULT_SHARD_SYNC_INITIAL_DELAY_MILLIS,
            ),
            periodic_shard_sync_interval: Duration::from_millis(
                crate::DEFAULT_PERIODIC_SHARD_SYNC_INTERVAL_MILLIS,
            ),
            old_stream_deferred_deletion_period: Duration::from_secs(600),
            new_stream_check_interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(30),
            cleanup: LeaseCleanupConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// External collaborators handed to the scheduler
pub struct SchedulerDependencies {
    pub source: Arc<dyn StreamSource>,
    pub lease_store: Arc<dyn LeaseStore>,
    pub lease_coordinator: Arc<dyn LeaseCoordinator>,
    pub checkpointer: Arc<dyn Checkpointer>,
    pub consumer_factory: Arc<dyn ShardConsumerFactory>,
    pub leader_decider: Arc<dyn LeaderDecider>,
    pub worker_state_listener: Arc<dyn WorkerStateChangeListener>,
    pub diagnostic_handler: Arc<dyn DiagnosticEventHandler>,
}

impl SchedulerDependencies {
    pub fn new(
        source: Arc<dyn StreamSource>,
        lease_store: Arc<dyn LeaseStore>,
        lease_coordinator: Arc<dyn LeaseCoordinator>,
        checkpointer: Arc<dyn Checkpointer>,
        consumer_factory: Arc<dyn ShardConsumerFactory>,
        leader_decider: Arc<dyn LeaderDecider>,
    ) -> Self {
        Self {
            source,
            lease_store,
            lease_coordinator,
            checkpointer,
            consumer_factory,
            leader_decider,
            worker_state_listener: Arc::new(NoOpWorkerStateChangeListener),
            diagnostic_handler: Arc::new(LoggingDiagnosticEventHandler),
        }
    }

    pub fn with_worker_state_listener(
        mut self,
        listener: Arc<dyn WorkerStateChangeListener>,
    ) -> Self {
        self.worker_state_listener = listener;
        self
    }

    pub fn with_diagnostic_handler(mut self, handler: Arc<dyn DiagnosticEventHandler>) -> Self {
        self.diagnostic_handler = handler;
        self
    }
}

/// Top-level worker control loop
pub struct Scheduler {
    config: SchedulerConfig,
    tracker: StreamTracker,
    lease_coordinator: Arc<dyn LeaseCoordinator>,
    checkpointer: Arc<dyn Checkpointer>,
    consumer_factory: Arc<dyn ShardConsumerFactory>,
    worker_state_listener: Arc<dyn WorkerStateChangeListener>,
    diagnostic_handler: Arc<dyn DiagnosticEventHandler>,
    registry: ShardConsumerRegistry,
    executor: Arc<ConsumerExecutor>,
    current_stream_config_map: Arc<RwLock<HashMap<StreamIdentifier, StreamConfig>>>,
    stale_stream_deletion_map: Mutex<HashMap<StreamIdentifier, Instant>>,
    sync_managers: Arc<ShardSyncTaskManagerCache>,
    periodic_shard_sync: Arc<PeriodicShardSyncManager>,
    lease_cleanup: Arc<LeaseCleanupManager>,
    error_sink: Mutex<Option<UndeliverableErrorSink>>,
    last_streams_sync_check: Mutex<Instant>,
    shutdown_requested: AtomicBool,
    shutdown_signal: ShutdownSignal,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, tracker: StreamTracker, deps: SchedulerDependencies) -> Self {
        let multi_stream_mode = tracker.is_multi_stream();

        let current_stream_config_map: Arc<RwLock<HashMap<StreamIdentifier, StreamConfig>>> =
            Arc::new(RwLock::new(
                tracker
                    .stream_configs()
                    .into_iter()
                    .map(|stream_config| (stream_config.stream_identifier.clone(), stream_config))
                    .collect(),
            ));
        standard::TRACKED_STREAMS.set(current_stream_config_map.read().len() as i64);

        let sync_managers = Arc::new(ShardSyncTaskManagerCache::direct(
            Arc::clone(&deps.source),
            Arc::clone(&deps.lease_store),
            multi_stream_mode,
        ));

        let periodic_shard_sync = Arc::new(PeriodicShardSyncManager::new(
            config.worker_id.clone(),
            Arc::clone(&deps.leader_decider),
            Arc::clone(&deps.lease_store),
            Arc::clone(&current_stream_config_map),
            Arc::clone(&sync_managers),
            multi_stream_mode,
            config.shard_sync_initial_delay,
            config.periodic_shard_sync_interval,
        ));

        let lease_cleanup = Arc::new(LeaseCleanupManager::new(
            Arc::clone(&deps.lease_store),
            Arc::clone(&deps.source),
            config.cleanup.clone(),
        ));

        let executor = Arc::new(ConsumerExecutor::new(config.executor.clone()));

        deps.worker_state_listener
            .on_worker_state_change(WorkerState::Created);

        Self {
            tracker,
            lease_coordinator: deps.lease_coordinator,
            checkpointer: deps.checkpointer,
            consumer_factory: deps.consumer_factory,
            worker_state_listener: deps.worker_state_listener,
            diagnostic_handler: deps.diagnostic_handler,
            registry: ShardConsumerRegistry::new(),
            executor,
            current_stream_config_map,
            stale_stream_deletion_map: Mutex::new(HashMap::new()),
            sync_managers,
            periodic_shard_sync,
            lease_cleanup,
            error_sink: Mutex::new(None),
            last_streams_sync_check: Mutex::new(Instant::now()),
            shutdown_requested: AtomicBool::new(false),
            shutdown_signal: ShutdownSignal::new(),
            config,
        }
    }

    pub fn application_name(&self) -> &str {
        &self.config.application_name
    }

    /// Runs the worker: initialize with bounded retries, then the process
    /// loop until shutdown. Initialization exhaustion is fatal and
    /// surfaces as the returned error.
    pub async fn run(&self) -> Result<()> {
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Err(e) = self.initialize().await {
            error!(
                "Worker {} failed to initialize: {}",
                self.config.worker_id, e
            );
            return Err(e);
        }

        info!("Initialization complete. Starting worker loop.");
        self.worker_state_listener
            .on_worker_state_change(WorkerState::Started);

        let mut shutdown_rx = self.shutdown_signal.subscribe();
        while !self.shutdown_requested.load(Ordering::Acquire) {
            self.run_process_loop().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.parent_shard_poll_interval) => {}
                _ = shutdown_rx.recv() => {}
            }
        }
        info!("Worker loop is complete. Exiting from worker.");
        Ok(())
    }

    /// Prepares the worker: installs the async error sink, initializes
    /// the lease coordinator, performs the initial shard sync with
    /// bounded retries, and starts the background managers.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut sink = self.error_sink.lock();
            if sink.is_none() {
                *sink = Some(UndeliverableErrorSink::install(
                    Arc::clone(&self.executor),
                    Arc::clone(&self.diagnostic_handler),
                ));
            }
        }

        self.worker_state_listener
            .on_worker_state_change(WorkerState::Initializing);

        let mut streams_synced: HashSet<StreamIdentifier> = HashSet::new();
        let mut last_error: Option<CoordinatorError> = None;
        let mut done = false;

        for attempt in 1..=self.config.max_initialization_attempts {
            debug!(
                "Initialization attempt {} of {}",
                attempt, self.config.max_initialization_attempts
            );

            match self.try_initialize_once(&mut streams_synced).await {
                Ok(()) => {
                    done = true;
                    break;
                }
                Err(e) => {
                    warn!("Initialization attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }

            if attempt < self.config.max_initialization_attempts {
                tokio::time::sleep(self.config.parent_shard_poll_interval).await;
            }
        }

        if !done {
            return Err(CoordinatorError::InitializationFailed {
                attempts: self.config.max_initialization_attempts,
                last_error: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            });
        }

        self.lease_coordinator.start().await?;
        self.periodic_shard_sync.start();
        self.lease_cleanup.start();

        self.worker_state_listener
            .on_worker_state_change(WorkerState::Initialized);
        Ok(())
    }

    /// One initialization pass: coordinator init plus a shard sync for
    /// every stream that has not yet synced successfully. Streams that
    /// succeed drop out of later attempts.
    async fn try_initialize_once(
        &self,
        streams_synced: &mut HashSet<StreamIdentifier>,
    ) -> Result<()> {
        self.lease_coordinator.initialize().await?;

        let pending: Vec<StreamConfig> = {
            let map = self.current_stream_config_map.read();
            map.values()
                .filter(|config| !streams_synced.contains(&config.stream_identifier))
                .cloned()
                .collect()
        };

        let mut first_error: Option<CoordinatorError> = None;
        for stream_config in pending {
            info!(
                "Syncing shard info for {}",
                stream_config.stream_identifier
            );
            let manager = self.sync_managers.for_stream(&stream_config);
            match manager.execute_sync().await {
                Ok(()) => {
                    streams_synced.insert(stream_config.stream_identifier.clone());
                }
                Err(e) => {
                    warn!(
                        "Initial shard sync failed for {}: {}",
                        stream_config.stream_identifier, e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One scheduler tick: diff assignments against live consumers, then
    /// reconcile the tracked stream set when due. Never panics the loop;
    /// per-tick failures are logged.
    pub async fn run_process_loop(&self) {
        let tick_started = Instant::now();

        let assignments = self.lease_coordinator.current_assignments().await;
        let mut active: Vec<ShardInfo> = Vec::with_capacity(assignments.len());

        for shard_info in assignments {
            if self.registry.get(&shard_info).is_some() {
                // Same tenancy, consumer already live; the checkpoint may
                // have advanced but that never rebuilds a consumer.
                active.push(shard_info);
                continue;
            }

            match self.checkpointer.checkpoint_for(&shard_info.lease_key()).await {
                Ok(checkpoint) if checkpoint.is_shard_end() => {
                    debug!(
                        "Shard {} is already at shard end, not building a consumer",
                        shard_info.shard_id
                    );
                }
                Ok(_) => {
                    self.build_consumer(&shard_info);
                    active.push(shard_info);
                }
                Err(e) => {
                    warn!(
                        "Could not fetch checkpoint for shard {}: {}. Skipping this tick.",
                        shard_info.shard_id, e
                    );
                }
            }
        }

        self.registry.retire_absent(&active);
        self.registry.sweep_finished();

        if self.should_sync_streams_now() {
            if let Err(e) = self.check_and_sync_stream_shards_and_leases().await {
                warn!("Failed to reconcile tracked streams: {}", e);
            }
        }

        standard::PROCESS_LOOP_DURATION.observe(tick_started.elapsed().as_secs_f64());
    }

    /// Builds the consumer for a newly observed shard tenancy
    fn build_consumer(&self, shard_info: &ShardInfo) -> Arc<dyn ShardConsumer> {
        self.registry
            .create_or_get(shard_info, self.consumer_factory.as_ref())
    }

    /// Returns the consumer for this tenancy, constructing it if absent
    pub fn create_or_get_shard_consumer(&self, shard_info: &ShardInfo) -> Arc<dyn ShardConsumer> {
        self.registry
            .create_or_get(shard_info, self.consumer_factory.as_ref())
    }

    /// Requests shutdown of consumers whose tenancy is not assigned
    pub fn cleanup_shard_consumers(&self, assigned: &[ShardInfo]) {
        self.registry.retire_absent(assigned);
    }

    /// Whether the tracker should be reconciled this tick
    pub fn should_sync_streams_now(&self) -> bool {
        self.tracker.is_multi_stream()
            && self.last_streams_sync_check.lock().elapsed() >= self.config.new_stream_check_interval
    }

    /// Reconciles the tracker's declared streams into
    /// `current_stream_config_map`: new streams are inserted and synced,
    /// streams absent beyond the deferment period are drained and
    /// dropped. Returns the set of streams synced by this call.
    pub async fn check_and_sync_stream_shards_and_leases(
        &self,
    ) -> Result<HashSet<StreamIdentifier>> {
        *self.last_streams_sync_check.lock() = Instant::now();

        let declared = self.tracker.stream_configs();
        let declared_ids: HashSet<StreamIdentifier> = declared
            .iter()
            .map(|config| config.stream_identifier.clone())
            .collect();

        let mut synced: HashSet<StreamIdentifier> = HashSet::new();

        // New streams enter the config map before their first sync so a
        // concurrent reader never observes a synced-but-untracked stream.
        for stream_config in &declared {
            let is_new = {
                let mut map = self.current_stream_config_map.write();
                if map.contains_key(&stream_config.stream_identifier) {
                    false
                } else {
                    map.insert(
                        stream_config.stream_identifier.clone(),
                        stream_config.clone(),
                    );
                    true
                }
            };
            if !is_new {
                continue;
            }
            info!(
                "Found new stream to process: {}. Syncing shards and leases.",
                stream_config.stream_identifier
            );
            let manager = self.sync_managers.for_stream(stream_config);
            match manager.execute_sync().await {
                Ok(()) => {
                    synced.insert(stream_config.stream_identifier.clone());
                }
                Err(e) => {
                    warn!(
                        "Shard sync for new stream {} failed: {}",
                        stream_config.stream_identifier, e
                    );
                }
            }
        }

        // Absent streams: start (or continue) the deferment clock, and
        // collect those past it for retirement.
        let now = Instant::now();
        let deferment = self.config.old_stream_deferred_deletion_period;
        let expired: Vec<StreamConfig> = {
            let map = self.current_stream_config_map.read();
            let mut stale = self.stale_stream_deletion_map.lock();
            let expired = map
                .iter()
                .filter(|(stream, _)| !declared_ids.contains(*stream))
                .filter(|(stream, _)| {
                    let first_absent = *stale.entry((*stream).clone()).or_insert(now);
                    now.duration_since(first_absent) >= deferment
                })
                .map(|(_, config)| config.clone())
                .collect();
            // A stream that returned resumes as-is; its clock is erased.
            stale.retain(|stream, _| !declared_ids.contains(stream));
            expired
        };

        for stream_config in expired {
            let stream = stream_config.stream_identifier.clone();
            info!(
                "Stream {} left the tracker beyond the deferment period. Syncing and retiring it.",
                stream
            );
            let manager = self.sync_managers.for_stream(&stream_config);
            match manager.execute_sync().await {
                Ok(()) => {
                    self.current_stream_config_map.write().remove(&stream);
                    self.stale_stream_deletion_map.lock().remove(&stream);
                    self.sync_managers.evict(&stream);
                    synced.insert(stream);
                }
                Err(e) => {
                    warn!("Drain sync for retiring stream {} failed: {}", stream, e);
                }
            }
        }

        standard::TRACKED_STREAMS.set(self.current_stream_config_map.read().len() as i64);
        Ok(synced)
    }

    /// Shuts the worker down: stops lease renewal, the background
    /// managers, and every consumer, then reports `ShutDown`. Idempotent
    /// and safe to call from any task.
    pub async fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Worker {} shutdown requested.", self.config.worker_id);
        self.worker_state_listener
            .on_worker_state_change(WorkerState::ShutDownStarted);

        // Stopping the coordinator first releases this worker's leases so
        // the fleet can reassign them while consumers drain.
        self.lease_coordinator.stop().await;
        self.periodic_shard_sync.stop();
        self.lease_cleanup.stop();

        self.registry.request_shutdown_all();
        let deadline = Instant::now() + self.config.graceful_shutdown_timeout;
        while !self.registry.all_shutdown_complete() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !self.registry.all_shutdown_complete() {
            warn!(
                "{} consumer(s) did not finish shutting down within {:?}",
                self.registry.len(),
                self.config.graceful_shutdown_timeout
            );
        }
        self.registry.sweep_finished();

        self.shutdown_signal.shutdown();
        self.worker_state_listener
            .on_worker_state_change(WorkerState::ShutDown);
    }

    /// Reports an error that surfaced outside any caller's control flow
    pub fn report_undeliverable_error(&self, error: CoordinatorError) {
        if let Some(sink) = self.error_sink.lock().as_ref() {
            sink.report(error);
        } else {
            warn!("Undeliverable error before initialization: {}", error);
        }
    }

    /// Snapshot of the tracked stream configurations
    pub fn current_stream_config_map(&self) -> HashMap<StreamIdentifier, StreamConfig> {
        self.current_stream_config_map.read().clone()
    }

    /// Streams currently waiting out the deferment period
    pub fn stale_stream_deletion_map(&self) -> HashSet<StreamIdentifier> {
        self.stale_stream_deletion_map.lock().keys().cloned().collect()
    }

    /// Number of live consumers in the registry
    pub fn shard_consumer_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue handle used by consumers to hand leases over for deferred
    /// deletion
    pub fn lease_cleanup_manager(&self) -> Arc<LeaseCleanupManager> {
        Arc::clone(&self.lease_cleanup)
    }

    /// The leader-gated periodic sync driver
    pub fn periodic_shard_sync_manager(&self) -> Arc<PeriodicShardSyncManager> {
        Arc::clone(&self.periodic_shard_sync)
    }

    /// Occupancy of the consumer executor
    pub fn executor(&self) -> Arc<ConsumerExecutor> {
        Arc::clone(&self.executor)
    }
}
