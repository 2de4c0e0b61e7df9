//! TTL key-value store.
//!
//! Two interchangeable implementations sit behind [`TtlStore`]:
//!
//! - [`InMemoryTtlStore`]: single-instance, one mutex around a map, lazy expiry
//! - `RedisTtlStore` (feature `redis`): shared across instances, native atomic
//!   commands, every round trip bounded by a timeout
//!
//! Callers never branch on which one is active. Store errors are returned as
//! values; each dependent component decides how to degrade (the rate limiter
//! and nonce check fail open, the job tracker falls back to an in-process map).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use hookguard_core::{Clock, ReliabilityConfig};

pub mod glob;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use in_memory::InMemoryTtlStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisTtlStore;

/// Store failure. Always a degradation signal, never a reason to crash.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store command failed: {0}")]
    Command(String),
}

/// A single stored value with optional expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// An entry is dead from the instant its expiry is reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key-value cache with per-key expiry and atomic primitives.
///
/// All single-key operations are atomic with respect to concurrent callers.
/// TTLs are whole seconds; `None` (or zero in `set`) means "never expires".
#[async_trait]
pub trait TtlStore: Send + Sync + core::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError>;

    /// Delete keys; `true` if at least one existed.
    async fn delete(&self, keys: &[&str]) -> Result<bool, StoreError>;

    /// Create the key only if it is absent or expired. `true` if it was created.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError>;

    /// Add one to an integer value, creating it at 1. A non-integer value resets to 1.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Update the expiry of a live key. `ttl_secs <= 0` clears the expiry.
    /// `false` if the key is absent or expired.
    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, StoreError>;

    /// Live keys matching a glob pattern (`*`, `?`, `[...]`), sorted.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Proactively drop expired keys, returning how many went. Backends with
    /// native expiry have nothing to do.
    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Whether state is visible to other process instances.
    fn is_shared(&self) -> bool {
        false
    }
}

/// Select the store once at startup.
///
/// A configured and reachable shared store wins; anything else (not compiled
/// in, unreachable, bad URL) falls back to the in-process store with a warning.
pub async fn connect_store(
    config: &ReliabilityConfig,
    clock: Arc<dyn Clock>,
) -> Arc<dyn TtlStore> {
    if let Some(url) = config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        {
            let timeout = Duration::from_millis(config.store_timeout_ms);
            match RedisTtlStore::connect(url, timeout).await {
                Ok(store) => match store.ping().await {
                    Ok(()) => {
                        info!(backend = store.backend(), "shared store connected");
                        return Arc::new(store);
                    }
                    Err(e) => warn!(error = %e, "shared store ping failed; using in-process store"),
                },
                Err(e) => warn!(error = %e, "shared store unreachable; using in-process store"),
            }
        }
        #[cfg(not(feature = "redis"))]
        {
            let _ = url;
            warn!("redis_url is set but redis support is not compiled in; using in-process store");
        }
    }

    let store = InMemoryTtlStore::new(clock);
    info!(backend = store.backend(), "using in-process store");
    Arc::new(store)
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;

    use super::{StoreError, TtlStore};

    /// Store whose every operation fails, simulating an unreachable server.
    #[derive(Debug, Default)]
    pub(crate) struct UnreachableStore;

    #[async_trait]
    impl TtlStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<u64>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _: &[&str]) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_if_absent(&self, _: &str, _: &str, _: Option<u64>) -> Result<bool, StoreError> {
            Err(StoreError::Timeout(std::time::Duration::from_millis(500)))
        }
        async fn increment(&self, _: &str) -> Result<i64, StoreError> {
            Err(StoreError::Timeout(std::time::Duration::from_millis(500)))
        }
        async fn expire(&self, _: &str, _: i64) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn keys(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn backend(&self) -> &'static str {
            "unreachable"
        }
        fn is_shared(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookguard_core::ManualClock;

    #[test]
    fn entry_expires_at_its_deadline() {
        let clock = ManualClock::at_epoch_secs(1_000);
        let now = clock.now();
        let entry = CacheEntry::new("v", Some(now + chrono::Duration::seconds(10)));

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + chrono::Duration::seconds(9)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(10)));
        assert!(!CacheEntry::new("v", None).is_expired(now + chrono::Duration::days(365)));
    }

    #[tokio::test]
    async fn connect_without_url_uses_in_process_store() {
        let cfg = ReliabilityConfig::default();
        let store = connect_store(&cfg, Arc::new(ManualClock::default())).await;
        assert_eq!(store.backend(), "in-memory");
        assert!(!store.is_shared());
    }

    #[tokio::test]
    async fn unreachable_shared_store_falls_back() {
        let cfg = ReliabilityConfig {
            redis_url: Some("redis://127.0.0.1:1".to_string()),
            store_timeout_ms: 200,
            ..Default::default()
        };
        let store = connect_store(&cfg, Arc::new(ManualClock::default())).await;
        assert_eq!(store.backend(), "in-memory");
        store.ping().await.unwrap();
    }
}
