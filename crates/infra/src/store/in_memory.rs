//! In-process TTL store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use hookguard_core::{Clock, SystemClock};

use super::glob::glob_match;
use super::{CacheEntry, StoreError, TtlStore};

/// Longest TTL honoured; larger values are clamped (roughly a century).
const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Single-instance store: one mutex guards the whole map.
///
/// Expiry is lazy (checked on access and during scans). [`Self::purge_expired`]
/// exists for an optional periodic sweep; nothing depends on it for correctness.
#[derive(Debug)]
pub struct InMemoryTtlStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTtlStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Every mutation leaves the map consistent, so a poisoned guard is still usable.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn deadline(now: DateTime<Utc>, ttl_secs: Option<u64>) -> Option<DateTime<Utc>> {
        ttl_secs
            .filter(|s| *s > 0)
            .map(|s| now + Duration::seconds(i64::try_from(s).unwrap_or(MAX_TTL_SECS).min(MAX_TTL_SECS)))
    }

    /// Live entry for `key`, removing it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut CacheEntry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Ok(Self::live(&mut entries, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.lock().insert(
            key.to_string(),
            CacheEntry::new(value, Self::deadline(now, ttl_secs)),
        );
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let mut any = false;
        for key in keys {
            if let Some(entry) = entries.remove(*key) {
                any |= !entry.is_expired(now);
            }
        }
        Ok(any)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            CacheEntry::new(value, Self::deadline(now, ttl_secs)),
        );
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let next = entry
                    .value
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| n.checked_add(1))
                    .unwrap_or(1);
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(key.to_string(), CacheEntry::new("1", None));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let Some(entry) = Self::live(&mut entries, key, now) else {
            return Ok(false);
        };
        entry.expires_at =
            (ttl_secs > 0).then(|| now + Duration::seconds(ttl_secs.min(MAX_TTL_SECS)));
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        Ok(self.purge_expired())
    }

    fn backend(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookguard_core::ManualClock;
    use proptest::prelude::*;

    fn store() -> (InMemoryTtlStore, ManualClock) {
        let clock = ManualClock::at_epoch_secs(1_700_000_000);
        (InMemoryTtlStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_until_ttl_elapses() {
        let (store, clock) = store();
        store.set("k", "v", Some(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance_secs(9);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance_secs(1);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_without_ttl_never_expires() {
        let (store, clock) = store();
        store.set("forever", "1", None).await.unwrap();
        store.set("zero", "1", Some(0)).await.unwrap();
        clock.advance_secs(10 * 365 * 24 * 3600);
        assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("zero").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_existed() {
        let (store, clock) = store();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "1", Some(1)).await.unwrap();

        assert!(store.delete(&["a", "missing"]).await.unwrap());
        assert!(!store.delete(&["a"]).await.unwrap());

        clock.advance_secs(5);
        assert!(!store.delete(&["b"]).await.unwrap());
    }

    #[tokio::test]
    async fn set_if_absent_only_creates_once() {
        let (store, clock) = store();
        assert!(store.set_if_absent("nonce", "1", Some(60)).await.unwrap());
        assert!(!store.set_if_absent("nonce", "2", Some(60)).await.unwrap());
        assert_eq!(store.get("nonce").await.unwrap().as_deref(), Some("1"));

        clock.advance_secs(60);
        assert!(store.set_if_absent("nonce", "3", Some(60)).await.unwrap());
        assert_eq!(store.get("nonce").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn increment_semantics() {
        let (store, _clock) = store();
        assert_eq!(store.increment("absent").await.unwrap(), 1);
        assert_eq!(store.increment("absent").await.unwrap(), 2);

        store.set("five", "5", None).await.unwrap();
        assert_eq!(store.increment("five").await.unwrap(), 6);

        store.set("text", "abc", None).await.unwrap();
        assert_eq!(store.increment("text").await.unwrap(), 1);
        assert_eq!(store.get("text").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn increment_keeps_expiry_and_restarts_after_it() {
        let (store, clock) = store();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert!(store.expire("c", 60).await.unwrap());
        assert_eq!(store.increment("c").await.unwrap(), 2);

        clock.advance_secs(60);
        assert_eq!(store.increment("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_semantics() {
        let (store, clock) = store();
        assert!(!store.expire("missing", 10).await.unwrap());

        store.set("k", "v", Some(5)).await.unwrap();
        assert!(store.expire("k", 0).await.unwrap());
        clock.advance_secs(100);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        assert!(store.expire("k", 10).await.unwrap());
        clock.advance_secs(10);
        assert!(!store.expire("k", 10).await.unwrap());
    }

    #[tokio::test]
    async fn keys_filters_by_pattern_and_purges_expired() {
        let (store, clock) = store();
        store.set("ratelimit:a", "1", Some(5)).await.unwrap();
        store.set("ratelimit:b", "1", None).await.unwrap();
        store.set("webhook:nonce:m1", "1", None).await.unwrap();

        assert_eq!(
            store.keys("ratelimit:*").await.unwrap(),
            vec!["ratelimit:a".to_string(), "ratelimit:b".to_string()]
        );

        clock.advance_secs(5);
        assert_eq!(store.keys("ratelimit:*").await.unwrap(), vec!["ratelimit:b".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_entries() {
        let (store, clock) = store();
        store.set("short", "1", Some(1)).await.unwrap();
        store.set("long", "1", Some(100)).await.unwrap();
        clock.advance_secs(2);

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn sweep_through_the_trait_purges() {
        let (store, clock) = store();
        let shared: Arc<dyn TtlStore> = Arc::new(store);
        shared.set("gone", "1", Some(1)).await.unwrap();
        shared.set("kept", "1", None).await.unwrap();
        clock.advance_secs(1);

        assert_eq!(shared.sweep_expired().await.unwrap(), 1);
        assert_eq!(shared.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryTtlStore::with_system_clock());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.increment("shared").await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap().as_deref(), Some("2000"));
    }

    proptest! {
        #[test]
        fn increment_on_integer_adds_one(n in -1_000_000i64..1_000_000) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (store, _clock) = store();
            let next = rt.block_on(async {
                store.set("n", &n.to_string(), None).await.unwrap();
                store.increment("n").await.unwrap()
            });
            prop_assert_eq!(next, n + 1);
        }

        #[test]
        fn increment_on_non_integer_resets(s in "[a-zA-Z ]{1,12}") {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (store, _clock) = store();
            let next = rt.block_on(async {
                store.set("s", &s, None).await.unwrap();
                store.increment("s").await.unwrap()
            });
            prop_assert_eq!(next, 1);
        }
    }
}
