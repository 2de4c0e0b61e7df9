//! Redis-backed TTL store (shared across instances).
//!
//! Atomicity is delegated to Redis' native commands (`INCR`, `SET NX EX`);
//! nothing here emulates them with read-then-write. Every round trip is
//! bounded by `timeout` so an unreachable server resolves to a [`StoreError`]
//! instead of hanging the caller.
//!
//! `increment` on a non-integer value rewrites it to `1` with `KEEPTTL`, which
//! needs Redis 6.0 or later.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, ErrorKind, FromRedisValue, RedisError};
use tracing::{debug, instrument};

use super::{StoreError, TtlStore};

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisTtlStore {
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl core::fmt::Debug for RedisTtlStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisTtlStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisTtlStore {
    /// Open a multiplexed connection.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `timeout` - bound for the connect and for every later command
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { conn, timeout })
    }

    async fn query<T: FromRedisValue>(&self, cmd: Cmd) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.timeout, cmd.query_async(&mut conn)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(map_redis_error(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn is_not_integer(e: &RedisError) -> bool {
    e.kind() == ErrorKind::ResponseError && e.to_string().contains("not an integer")
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.query(redis::cmd("GET").arg(key).clone()).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs.filter(|t| *t > 0) {
            cmd.arg("EX").arg(ttl);
        }
        let _: String = self.query(cmd).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<bool, StoreError> {
        if keys.is_empty() {
            return Ok(false);
        }
        let removed: i64 = self.query(redis::cmd("DEL").arg(keys).clone()).await?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, value), level = "debug", err)]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_secs.filter(|t| *t > 0) {
            cmd.arg("EX").arg(ttl);
        }
        // Reply is "OK" when created, nil when the key already existed.
        let reply: Option<String> = self.query(cmd).await?;
        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let incr = redis::cmd("INCR").arg(key).clone();
        match tokio::time::timeout(self.timeout, incr.query_async::<_, i64>(&mut conn)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if is_not_integer(&e) => {
                debug!(key, "non-integer counter reset to 1");
                let _: String = self
                    .query(redis::cmd("SET").arg(key).arg(1).arg("KEEPTTL").clone())
                    .await?;
                Ok(1)
            }
            Ok(Err(e)) => Err(map_redis_error(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<bool, StoreError> {
        if ttl_secs > 0 {
            let updated: i64 = self
                .query(redis::cmd("EXPIRE").arg(key).arg(ttl_secs).clone())
                .await?;
            return Ok(updated == 1);
        }

        // PERSIST replies 0 both for "no such key" and "no TTL to clear".
        let exists: i64 = self.query(redis::cmd("EXISTS").arg(key).clone()).await?;
        if exists == 0 {
            return Ok(false);
        }
        let _: i64 = self.query(redis::cmd("PERSIST").arg(key).clone()).await?;
        Ok(true)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        // SCAN may return a key more than once; the set dedups and sorts.
        let mut found = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .clone(),
                )
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found.into_iter().collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.query(redis::cmd("PING")).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }

    fn is_shared(&self) -> bool {
        true
    }
}
