//! Bounded dead-letter queue for jobs that keep failing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use hookguard_core::{Clock, ReliabilityConfig};

use super::types::DeadLetterEntry;
use crate::store::TtlStore;

pub const DLQ_KEY_PREFIX: &str = "scheduler:dlq:";

/// In-memory ring buffer of [`DeadLetterEntry`], oldest evicted first.
///
/// When a shared store is attached, each entry is also written there with a
/// long retention so it survives a restart. That write is best effort: a
/// store failure is logged and the in-memory append still happens.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
    durable: Option<Arc<dyn TtlStore>>,
    retention_secs: u64,
    clock: Arc<dyn Clock>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            durable: None,
            retention_secs: 30 * 24 * 3600,
            clock,
        }
    }

    pub fn from_config(config: &ReliabilityConfig, clock: Arc<dyn Clock>) -> Self {
        let mut dlq = Self::new(config.dead_letter_capacity, clock);
        dlq.retention_secs = config.dead_letter_retention_days.saturating_mul(24 * 3600);
        dlq
    }

    /// Attach a durable copy target. Only shared stores are kept; an
    /// in-process store would add nothing the ring buffer does not have.
    pub fn with_durable_store(mut self, store: Arc<dyn TtlStore>) -> Self {
        if store.is_shared() {
            self.durable = Some(store);
        }
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn add(
        &self,
        job_name: &str,
        error: &str,
        context: &str,
    ) -> DeadLetterEntry {
        let entry = DeadLetterEntry::new(job_name, error, context, self.clock.now());

        {
            let mut entries = self.lock();
            while entries.len() >= self.capacity {
                if let Some(evicted) = entries.pop_front() {
                    debug!(job = %evicted.job_name, id = %evicted.id, "dead letter evicted");
                }
            }
            entries.push_back(entry.clone());
        }

        warn!(job = job_name, id = %entry.id, error, "job dead-lettered");

        if let Some(store) = &self.durable {
            self.persist(store.as_ref(), &entry).await;
        }
        entry
    }

    /// Entries oldest first.
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every in-memory entry. Durable copies age out on their own.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    async fn persist(&self, store: &dyn TtlStore, entry: &DeadLetterEntry) {
        let key = format!(
            "{DLQ_KEY_PREFIX}{}:{}",
            entry.job_name,
            entry.timestamp.timestamp_millis()
        );
        let payload = match serde_json::to_string(entry) {
            Ok(p) => p,
            Err(e) => {
                warn!(job = %entry.job_name, error = %e, "failed to encode dead letter");
                return;
            }
        };
        if let Err(e) = store.set(&key, &payload, Some(self.retention_secs)).await {
            warn!(
                job = %entry.job_name,
                backend = store.backend(),
                error = %e,
                "failed to persist dead letter"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetterEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hookguard_core::ManualClock;

    use super::*;
    use crate::store::testing::UnreachableStore;
    use crate::store::{InMemoryTtlStore, StoreError};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_epoch_secs(1_700_000_000))
    }

    /// In-memory store that claims to be shared, to exercise the durable path.
    #[derive(Debug)]
    struct SharedMemory(InMemoryTtlStore);

    #[async_trait]
    impl TtlStore for SharedMemory {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
            self.0.set(key, value, ttl).await
        }
        async fn delete(&self, keys: &[&str]) -> Result<bool, StoreError> {
            self.0.delete(keys).await
        }
        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Option<u64>,
        ) -> Result<bool, StoreError> {
            self.0.set_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.0.increment(key).await
        }
        async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, StoreError> {
            self.0.expire(key, ttl_secs).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            self.0.keys(pattern).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
        fn backend(&self) -> &'static str {
            "shared-memory"
        }
        fn is_shared(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn lists_oldest_first() {
        let dlq = DeadLetterQueue::new(10, clock());
        dlq.add("a", "e1", "ctx").await;
        dlq.add("b", "e2", "ctx").await;

        let names: Vec<_> = dlq.list().into_iter().map(|e| e.job_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(dlq.len(), 2);
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let dlq = DeadLetterQueue::new(100, clock());
        for i in 0..105 {
            dlq.add(&format!("job-{i}"), "boom", "").await;
        }

        let entries = dlq.list();
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].job_name, "job-5");
        assert_eq!(entries[99].job_name, "job-104");
    }

    #[tokio::test]
    async fn clear_empties_the_buffer() {
        let dlq = DeadLetterQueue::new(10, clock());
        dlq.add("a", "e", "").await;
        assert_eq!(dlq.clear(), 1);
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn writes_durable_copy_to_shared_store() {
        let clock = clock();
        let store = Arc::new(SharedMemory(InMemoryTtlStore::new(clock.clone())));
        let dlq = DeadLetterQueue::from_config(&ReliabilityConfig::default(), clock.clone())
            .with_durable_store(store.clone());

        let entry = dlq.add("sync", "timeout", "attempts=3").await;

        let keys = store.keys("scheduler:dlq:sync:*").await.unwrap();
        assert_eq!(keys.len(), 1);
        let raw = store.get(&keys[0]).await.unwrap().unwrap();
        let decoded: DeadLetterEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded, entry);

        clock.advance_secs(30 * 24 * 3600);
        assert!(store.keys("scheduler:dlq:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_process_store_is_not_used_as_durable_target() {
        let clock = clock();
        let store = Arc::new(InMemoryTtlStore::new(clock.clone()));
        let dlq = DeadLetterQueue::new(10, clock).with_durable_store(store.clone());

        dlq.add("sync", "timeout", "").await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn durable_failure_does_not_block_append() {
        let dlq = DeadLetterQueue::new(10, clock()).with_durable_store(Arc::new(UnreachableStore));
        dlq.add("sync", "timeout", "").await;
        assert_eq!(dlq.len(), 1);
    }
}
