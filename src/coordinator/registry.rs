//! Registry of live shard consumers
//!
//! Consumers are keyed by `(stream, shardId, concurrencyToken)` so a
//! re-leased shard can never be confused with its prior tenancy: a new
//! concurrency token means a new consumer, even for the same shard.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::consumer::{ShardConsumer, ShardConsumerFactory};
use crate::metrics::standard;
use crate::stream::{ShardInfo, StreamIdentifier};

/// Identity of one shard tenancy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConsumerKey {
    stream_identifier: Option<StreamIdentifier>,
    shard_id: String,
    concurrency_token: String,
}

impl From<&ShardInfo> for ConsumerKey {
    fn from(shard_info: &ShardInfo) -> Self {
        Self {
            stream_identifier: shard_info.stream_identifier.clone(),
            shard_id: shard_info.shard_id.clone(),
            concurrency_token: shard_info.concurrency_token.clone(),
        }
    }
}

/// Index of live consumers keyed by shard tenancy
#[derive(Default)]
pub struct ShardConsumerRegistry {
    consumers: Mutex<HashMap<ConsumerKey, Arc<dyn ShardConsumer>>>,
}

impl ShardConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the consumer registered for this tenancy, if any
    pub fn get(&self, shard_info: &ShardInfo) -> Option<Arc<dyn ShardConsumer>> {
        self.consumers.lock().get(&ConsumerKey::from(shard_info)).cloned()
    }

    /// Returns the consumer for this tenancy, constructing it through the
    /// factory if absent. Concurrent callers for the same tenancy all
    /// receive the same instance.
    pub fn create_or_get(
        &self,
        shard_info: &ShardInfo,
        factory: &dyn ShardConsumerFactory,
    ) -> Arc<dyn ShardConsumer> {
        let mut consumers = self.consumers.lock();
        let consumer = consumers
            .entry(ConsumerKey::from(shard_info))
            .or_insert_with(|| {
                debug!(
                    "Building consumer for shard {} (token {})",
                    shard_info.shard_id, shard_info.concurrency_token
                );
                standard::CONSUMERS_BUILT.inc();
                factory.create(shard_info)
            })
            .clone();
        standard::ACTIVE_CONSUMERS.set(consumers.len() as i64);
        consumer
    }

    /// Requests shutdown of every consumer whose tenancy is not in the
    /// active set. Consumers still assigned are untouched.
    pub fn retire_absent(&self, active: &[ShardInfo]) {
        let active_keys: HashSet<ConsumerKey> = active.iter().map(ConsumerKey::from).collect();
        let consumers = self.consumers.lock();
        for (key, consumer) in consumers.iter() {
            if !active_keys.contains(key) {
                debug!(
                    "Requesting shutdown of displaced consumer for shard {} (token {})",
                    key.shard_id, key.concurrency_token
                );
                consumer.request_shutdown();
            }
        }
    }

    /// Drops consumers whose shutdown has fully completed
    pub fn sweep_finished(&self) {
        let mut consumers = self.consumers.lock();
        consumers.retain(|_, consumer| !consumer.is_shutdown_complete());
        standard::ACTIVE_CONSUMERS.set(consumers.len() as i64);
    }

    /// Requests shutdown of every registered consumer
    pub fn request_shutdown_all(&self) {
        for consumer in self.consumers.lock().values() {
            consumer.request_shutdown();
        }
    }

    /// True once every registered consumer has finished shutting down
    pub fn all_shutdown_complete(&self) -> bool {
        self.consumers
            .lock()
            .values()
            .all(|consumer| consumer.is_shutdown_complete())
    }

    /// Number of registered consumers, finished or not
    pub fn len(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Checkpoint;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestConsumer {
        shutdown_requested: AtomicBool,
        shutdown_complete: AtomicBool,
    }

    impl TestConsumer {
        fn new() -> Self {
            Self {
                shutdown_requested: AtomicBool::new(false),
                shutdown_complete: AtomicBool::new(false),
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
            self.shutdown_complete.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        built: AtomicUsize,
        created: Mutex<Vec<Arc<TestConsumer>>>,
    }

    impl ShardConsumerFactory for CountingFactory {
        fn create(&self, _shard_info: &ShardInfo) -> Arc<dyn ShardConsumer> {
            self.built.fetch_add(1, Ordering::SeqCst);
            let consumer = Arc::new(TestConsumer::new());
            self.created.lock().push(Arc::clone(&consumer));
            consumer
        }
    }

    fn shard(shard_id: &str, token: &str) -> ShardInfo {
        ShardInfo::new(shard_id, token, vec![], Checkpoint::TrimHorizon)
    }

    #[test]
    fn same_tenancy_returns_same_consumer() {
        let registry = ShardConsumerRegistry::new();
        let factory = CountingFactory::default();
        let info = shard("shardId-000000000000", "ct1");

        let first = registry.create_or_get(&info, &factory);
        let second = registry.create_or_get(&info, &factory);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_tokens_produce_distinct_consumers() {
        let registry = ShardConsumerRegistry::new();
        let factory = CountingFactory::default();

        let first = registry.create_or_get(&shard("shardId-000000000000", "ct1"), &factory);
        let second = registry.create_or_get(&shard("shardId-000000000000", "ct2"), &factory);
        let third = registry.create_or_get(&shard("shardId-000000000000", "ct1"), &factory);

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retire_shuts_down_only_displaced_tenancies() {
        let registry = ShardConsumerRegistry::new();
        let factory = CountingFactory::default();

        let shard0_ct1 = shard("shardId-000000000000", "ct1");
        let shard0_ct2 = shard("shardId-000000000000", "ct2");
        let shard1_ct1 = shard("shardId-000000000001", "ct1");

        let kept0 = registry.create_or_get(&shard0_ct1, &factory);
        let displaced = registry.create_or_get(&shard0_ct2, &factory);
        let kept1 = registry.create_or_get(&shard1_ct1, &factory);

        registry.retire_absent(&[shard0_ct1, shard1_ct1]);

        assert!(displaced.is_shutdown_requested());
        assert!(!kept0.is_shutdown_requested());
        assert!(!kept1.is_shutdown_requested());
    }

    #[test]
    fn sweep_drops_only_finished_consumers() {
        let registry = ShardConsumerRegistry::new();
        let factory = CountingFactory::default();

        registry.create_or_get(&shard("shardId-000000000000", "ct1"), &factory);
        registry.create_or_get(&shard("shardId-000000000001", "ct1"), &factory);
        assert_eq!(registry.len(), 2);

        factory.created.lock()[0]
            .shutdown_complete
            .store(true, Ordering::SeqCst);

        registry.sweep_finished();
        assert_eq!(registry.len(), 1);
    }
}
