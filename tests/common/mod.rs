//! Shared test doubles for the coordinator suites

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use riptide_core::consumer::{Checkpointer, ShardConsumer, ShardConsumerFactory};
use riptide_core::coordinator::{WorkerState, WorkerStateChangeListener};
use riptide_core::error::{CoordinatorError, Result};
use riptide_core::leases::LeaseCoordinator;
use riptide_core::stream::{
    Checkpoint, ChildShard, RecordBatch, ShardDescriptor, ShardInfo, ShardIteratorKind,
    StreamIdentifier, StreamSource,
};

/// Routes crate logs through the test harness; safe to call repeatedly
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Ordered record of lifecycle events across collaborating mocks
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn position_of(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }
}

/// Stream source with scripted failures and child-shard topology
#[derive(Default)]
pub struct MockStreamSource {
    shards: Mutex<HashMap<StreamIdentifier, Vec<ShardDescriptor>>>,
    /// Remaining list_shards failures per stream
    failures_remaining: Mutex<HashMap<StreamIdentifier, usize>>,
    fail_always: Mutex<HashSet<StreamIdentifier>>,
    list_calls: Mutex<HashMap<StreamIdentifier, usize>>,
    /// Shard ids for which the probe raises ResourceNotFound
    vanished_shards: Mutex<HashSet<String>>,
    /// Child shards surfaced at shard end, by parent shard id
    child_shards: Mutex<HashMap<String, Vec<ChildShard>>>,
    /// When set, every source call fails with a transient error
    transient_outage: AtomicBool,
}

impl MockStreamSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shards(&self, stream: StreamIdentifier, shards: Vec<ShardDescriptor>) {
        self.shards.lock().insert(stream, shards);
    }

    pub fn fail_list_shards_once(&self, stream: StreamIdentifier) {
        self.failures_remaining.lock().insert(stream, 1);
    }

    pub fn fail_list_shards_always(&self, stream: StreamIdentifier) {
        self.fail_always.lock().insert(stream);
    }

    pub fn mark_shard_vanished(&self, shard_id: impl Into<String>) {
        self.vanished_shards.lock().insert(shard_id.into());
    }

    pub fn set_child_shards(&self, parent_shard_id: impl Into<String>, children: Vec<ChildShard>) {
        self.child_shards.lock().insert(parent_shard_id.into(), children);
    }

    pub fn set_transient_outage(&self, on: bool) {
        self.transient_outage.store(on, Ordering::SeqCst);
    }

    pub fn list_calls_for(&self, stream: &StreamIdentifier) -> usize {
        self.list_calls.lock().get(stream).copied().unwrap_or(0)
    }

    pub fn total_list_calls(&self) -> usize {
        self.list_calls.lock().values().sum()
    }
}

#[async_trait]
impl StreamSource for MockStreamSource {
    async fn list_shards(&self, stream: &StreamIdentifier) -> Result<Vec<ShardDescriptor>> {
        *self.list_calls.lock().entry(stream.clone()).or_insert(0) += 1;

        if self.fail_always.lock().contains(stream) {
            return Err(CoordinatorError::Dependency {
                message: "service exception".into(),
            });
        }
        {
            let mut failures = self.failures_remaining.lock();
            if let Some(remaining) = failures.get_mut(stream) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CoordinatorError::Dependency {
                        message: "service exception".into(),
                    });
                }
            }
        }
        Ok(self.shards.lock().get(stream).cloned().unwrap_or_default())
    }

    async fn get_shard_iterator(
        &self,
        _stream: &StreamIdentifier,
        shard_id: &str,
        _kind: ShardIteratorKind,
    ) -> Result<String> {
        if self.transient_outage.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Dependency {
                message: "temporary outage".into(),
            });
        }
        if self.vanished_shards.lock().contains(shard_id) {
            return Err(CoordinatorError::ResourceNotFound {
                resource: shard_id.to_string(),
            });
        }
        // iterator token carries the shard id so get_records can route
        Ok(shard_id.to_string())
    }

    async fn get_records(&self, iterator: &str, _limit: usize) -> Result<RecordBatch> {
        if self.transient_outage.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Dependency {
                message: "temporary outage".into(),
            });
        }
        if self.vanished_shards.lock().contains(iterator) {
            return Err(CoordinatorError::ResourceNotFound {
                resource: iterator.to_string(),
            });
        }
        Ok(RecordBatch {
            records: vec![],
            child_shards: self.child_shards.lock().get(iterator).cloned().unwrap_or_default(),
            next_iterator: None,
        })
    }
}

/// Lease coordinator fed a script of assignment snapshots
pub struct MockLeaseCoordinator {
    scripted: Mutex<VecDeque<Vec<ShardInfo>>>,
    last: Mutex<Vec<ShardInfo>>,
    pub events: Arc<EventLog>,
}

impl MockLeaseCoordinator {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn push_assignments(&self, assignments: Vec<ShardInfo>) {
        self.scripted.lock().push_back(assignments);
    }
}

#[async_trait]
impl LeaseCoordinator for MockLeaseCoordinator {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {
        self.events.push("lease_coordinator.stop");
    }

    async fn current_assignments(&self) -> Vec<ShardInfo> {
        if let Some(next) = self.scripted.lock().pop_front() {
            *self.last.lock() = next.clone();
            return next;
        }
        self.last.lock().clone()
    }
}

/// Checkpointer backed by a plain map, counting lookups per key
#[derive(Default)]
pub struct MockCheckpointer {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_checkpoint(&self, lease_key: impl Into<String>, checkpoint: Checkpoint) {
        self.checkpoints.lock().insert(lease_key.into(), checkpoint);
    }

    pub fn calls_for(&self, lease_key: &str) -> usize {
        self.calls.lock().get(lease_key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Checkpointer for MockCheckpointer {
    async fn checkpoint_for(&self, lease_key: &str) -> Result<Checkpoint> {
        *self.calls.lock().entry(lease_key.to_string()).or_insert(0) += 1;
        Ok(self
            .checkpoints
            .lock()
            .get(lease_key)
            .cloned()
            .unwrap_or(Checkpoint::TrimHorizon))
    }
}

/// Consumer whose shutdown completes as soon as it is requested
pub struct TestConsumer {
    shutdown_requested: AtomicBool,
    complete_on_request: bool,
}

impl TestConsumer {
    pub fn new(complete_on_request: bool) -> Self {
        Self {
            shutdown_requested: AtomicBool::new(false),
            complete_on_request,
        }
    }
}

impl ShardConsumer for TestConsumer {
    fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    fn is_shutdown_complete(&self) -> bool {
        self.complete_on_request && self.shutdown_requested.load(Ordering::SeqCst)
    }
}

/// Factory recording every build with the tenancy it was built for
#[derive(Default)]
pub struct RecordingConsumerFactory {
    built: Mutex<Vec<(ShardInfo, Arc<TestConsumer>)>>,
}

impl RecordingConsumerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.built.lock().len()
    }

    pub fn build_count_for(&self, shard_id: &str, concurrency_token: &str) -> usize {
        self.built
            .lock()
            .iter()
            .filter(|(info, _)| {
                info.shard_id == shard_id && info.concurrency_token == concurrency_token
            })
            .count()
    }

    pub fn consumer_for(&self, shard_id: &str, concurrency_token: &str) -> Option<Arc<TestConsumer>> {
        self.built
            .lock()
            .iter()
            .find(|(info, _)| {
                info.shard_id == shard_id && info.concurrency_token == concurrency_token
            })
            .map(|(_, consumer)| Arc::clone(consumer))
    }
}

impl ShardConsumerFactory for RecordingConsumerFactory {
    fn create(&self, shard_info: &ShardInfo) -> Arc<dyn ShardConsumer> {
        let consumer = Arc::new(TestConsumer::new(true));
        self.built
            .lock()
            .push((shard_info.clone(), Arc::clone(&consumer)));
        consumer
    }
}

/// Listener appending worker state transitions to the shared event log
pub struct RecordingStateListener {
    pub events: Arc<EventLog>,
}

impl WorkerStateChangeListener for RecordingStateListener {
    fn on_worker_state_change(&self, state: WorkerState) {
        self.events.push(format!("state:{state:?}"));
    }
}
