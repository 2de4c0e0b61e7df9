//! Per-job execution bookkeeping on the TTL store.
//!
//! Each [`JobStatus`] field lives under its own key
//! (`scheduler:job:{name}:{field}`) so a partially written or partially
//! expired record still reads back as a usable status. If the primary store
//! errors, the same operation is replayed against an in-process store so the
//! tracker always has some backing; only cross-restart durability is lost.
//!
//! A failure is counted on the primary before anything else is written. Once
//! that increment lands, the primary's streak is authoritative and the
//! remaining field writes are best-effort.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use hookguard_core::{Clock, ReliabilityConfig};

use super::types::JobStatus;
use crate::store::{InMemoryTtlStore, StoreError, TtlStore};

pub const JOB_KEY_PREFIX: &str = "scheduler:job:";

const LAST_SUCCESS: &str = "last_success";
const LAST_FAILURE: &str = "last_failure";
const LAST_ERROR: &str = "last_error";
const CONSECUTIVE_FAILURES: &str = "consecutive_failures";
const SUCCESS_COUNT: &str = "success_count";
const FAILURE_COUNT: &str = "failure_count";
const CURRENT_RUN: &str = "current_run";

const FIELDS: [&str; 7] = [
    LAST_SUCCESS,
    LAST_FAILURE,
    LAST_ERROR,
    CONSECUTIVE_FAILURES,
    SUCCESS_COUNT,
    FAILURE_COUNT,
    CURRENT_RUN,
];

/// Store key for one status field.
pub fn job_key(job_name: &str, field: &str) -> String {
    format!("{JOB_KEY_PREFIX}{job_name}:{field}")
}

/// Inverse of [`job_key`]: the job name, if `key` is a tracker key.
fn job_name_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(JOB_KEY_PREFIX)?;
    let (name, field) = rest.rsplit_once(':')?;
    FIELDS.contains(&field).then_some(name)
}

/// Keep at most `max_chars` characters (not bytes).
pub fn truncate_error(error: &str, max_chars: usize) -> String {
    match error.char_indices().nth(max_chars) {
        Some((idx, _)) => error[..idx].to_string(),
        None => error.to_string(),
    }
}

#[derive(Debug)]
pub struct JobTracker {
    primary: Arc<dyn TtlStore>,
    fallback: InMemoryTtlStore,
    clock: Arc<dyn Clock>,
    status_ttl_secs: u64,
    running_ttl_secs: u64,
    max_error_len: usize,
}

impl JobTracker {
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>, config: &ReliabilityConfig) -> Self {
        Self {
            primary: store,
            fallback: InMemoryTtlStore::new(clock.clone()),
            clock,
            status_ttl_secs: config.job_status_ttl_secs,
            running_ttl_secs: config.running_marker_ttl_secs,
            max_error_len: config.max_error_len,
        }
    }

    /// Mark a run as in flight. The marker expires on its own so a crashed
    /// process cannot leave the job "running" forever.
    pub async fn record_start(&self, job_name: &str) {
        let now = self.clock.now();
        if let Err(e) = self.record_start_on(&*self.primary, job_name, now).await {
            self.degraded("record_start", job_name, &e);
            if let Err(e) = self.record_start_on(&self.fallback, job_name, now).await {
                warn!(job = job_name, error = %e, "fallback tracker write failed");
            }
        }
    }

    pub async fn record_success(&self, job_name: &str) {
        let now = self.clock.now();
        if let Err(e) = self.record_success_on(&*self.primary, job_name, now).await {
            self.degraded("record_success", job_name, &e);
            if let Err(e) = self.record_success_on(&self.fallback, job_name, now).await {
                warn!(job = job_name, error = %e, "fallback tracker write failed");
            }
        }
    }

    /// Record a terminal failure and return the new consecutive-failure count.
    pub async fn record_failure(&self, job_name: &str, error: &str) -> u32 {
        let now = self.clock.now();
        let error = truncate_error(error, self.max_error_len);
        let streak_key = job_key(job_name, CONSECUTIVE_FAILURES);

        match self.primary.increment(&streak_key).await {
            Ok(n) => {
                if let Err(e) = self
                    .failure_details_on(&*self.primary, job_name, &error, now)
                    .await
                {
                    warn!(
                        job = job_name,
                        consecutive = n,
                        error = %e,
                        "job failure counted but its details were only partly written"
                    );
                }
                to_count(n)
            }
            Err(e) => {
                self.degraded("record_failure", job_name, &e);
                self.record_failure_on(&self.fallback, job_name, &error, now)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(job = job_name, error = %e, "fallback tracker write failed");
                        1
                    })
            }
        }
    }

    pub async fn get_status(&self, job_name: &str) -> JobStatus {
        match Self::status_on(&*self.primary, job_name).await {
            Ok(status) => status,
            Err(e) => {
                self.degraded("get_status", job_name, &e);
                Self::status_on(&self.fallback, job_name)
                    .await
                    .unwrap_or_else(|_| JobStatus::new(job_name))
            }
        }
    }

    /// Names of every job with at least one live status key.
    pub async fn job_names(&self) -> Vec<String> {
        let pattern = format!("{JOB_KEY_PREFIX}*");
        let mut names = BTreeSet::new();

        match self.primary.keys(&pattern).await {
            Ok(keys) => names.extend(keys.iter().filter_map(|k| job_name_of(k)).map(String::from)),
            Err(e) => self.degraded("job_names", "*", &e),
        }
        if let Ok(keys) = self.fallback.keys(&pattern).await {
            names.extend(keys.iter().filter_map(|k| job_name_of(k)).map(String::from));
        }

        names.into_iter().collect()
    }

    pub async fn all_statuses(&self) -> Vec<JobStatus> {
        let mut statuses = Vec::new();
        for name in self.job_names().await {
            statuses.push(self.get_status(&name).await);
        }
        statuses
    }

    fn degraded(&self, op: &str, job_name: &str, e: &StoreError) {
        warn!(
            op,
            job = job_name,
            backend = self.primary.backend(),
            error = %e,
            "job tracker store unavailable; using in-process fallback"
        );
    }

    async fn record_start_on(
        &self,
        store: &dyn TtlStore,
        job_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        store
            .set(
                &job_key(job_name, CURRENT_RUN),
                &now.to_rfc3339(),
                Some(self.running_ttl_secs),
            )
            .await
    }

    async fn record_success_on(
        &self,
        store: &dyn TtlStore,
        job_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ttl = Some(self.status_ttl_secs);
        store
            .set(&job_key(job_name, LAST_SUCCESS), &now.to_rfc3339(), ttl)
            .await?;
        store
            .set(&job_key(job_name, CONSECUTIVE_FAILURES), "0", ttl)
            .await?;
        self.bump(store, &job_key(job_name, SUCCESS_COUNT)).await?;
        store.delete(&[job_key(job_name, CURRENT_RUN).as_str()]).await?;
        debug!(job = job_name, "job success recorded");
        Ok(())
    }

    async fn record_failure_on(
        &self,
        store: &dyn TtlStore,
        job_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let consecutive = store
            .increment(&job_key(job_name, CONSECUTIVE_FAILURES))
            .await?;
        self.failure_details_on(store, job_name, error, now).await?;
        Ok(to_count(consecutive))
    }

    /// Everything a failure writes besides the streak increment itself.
    async fn failure_details_on(
        &self,
        store: &dyn TtlStore,
        job_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let ttl = Some(self.status_ttl_secs);
        self.retain(store, &job_key(job_name, CONSECUTIVE_FAILURES))
            .await?;
        store
            .set(&job_key(job_name, LAST_FAILURE), &now.to_rfc3339(), ttl)
            .await?;
        store.set(&job_key(job_name, LAST_ERROR), error, ttl).await?;
        self.bump(store, &job_key(job_name, FAILURE_COUNT)).await?;
        store.delete(&[job_key(job_name, CURRENT_RUN).as_str()]).await?;
        debug!(job = job_name, "job failure recorded");
        Ok(())
    }

    /// Increment a counter and refresh its retention.
    async fn bump(&self, store: &dyn TtlStore, key: &str) -> Result<i64, StoreError> {
        let n = store.increment(key).await?;
        self.retain(store, key).await?;
        Ok(n)
    }

    async fn retain(&self, store: &dyn TtlStore, key: &str) -> Result<(), StoreError> {
        let ttl = i64::try_from(self.status_ttl_secs).unwrap_or(i64::MAX);
        store.expire(key, ttl).await?;
        Ok(())
    }

    async fn status_on(store: &dyn TtlStore, job_name: &str) -> Result<JobStatus, StoreError> {
        let field = |name: &str| job_key(job_name, name);

        Ok(JobStatus {
            job_name: job_name.to_string(),
            last_success: parse_time(store.get(&field(LAST_SUCCESS)).await?),
            last_failure: parse_time(store.get(&field(LAST_FAILURE)).await?),
            last_error: store.get(&field(LAST_ERROR)).await?,
            consecutive_failures: parse_count(store.get(&field(CONSECUTIVE_FAILURES)).await?),
            success_count: parse_count(store.get(&field(SUCCESS_COUNT)).await?),
            failure_count: parse_count(store.get(&field(FAILURE_COUNT)).await?),
            current_run_started_at: parse_time(store.get(&field(CURRENT_RUN)).await?),
        })
    }
}

fn to_count(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}

fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parse_count<T: std::str::FromStr + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use hookguard_core::ManualClock;

    use super::*;
    use crate::store::testing::UnreachableStore;

    /// In-memory store that can be armed to fail one `expire` on a key suffix.
    #[derive(Debug)]
    struct FlakyExpire {
        inner: InMemoryTtlStore,
        suffix: &'static str,
        armed: AtomicBool,
    }

    #[async_trait]
    impl TtlStore for FlakyExpire {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, keys: &[&str]) -> Result<bool, StoreError> {
            self.inner.delete(keys).await
        }
        async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<bool, StoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.increment(key).await
        }
        async fn expire(&self, key: &str, ttl: i64) -> Result<bool, StoreError> {
            if key.ends_with(self.suffix) && self.armed.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Timeout(std::time::Duration::from_millis(500)));
            }
            self.inner.expire(key, ttl).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            self.inner.keys(pattern).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    fn tracker() -> (JobTracker, Arc<InMemoryTtlStore>, ManualClock) {
        let clock = ManualClock::at_epoch_secs(1_700_000_000);
        let store = Arc::new(InMemoryTtlStore::new(Arc::new(clock.clone())));
        let tracker = JobTracker::new(
            store.clone(),
            Arc::new(clock.clone()),
            &ReliabilityConfig::default(),
        );
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn unseen_job_reports_zero_values() {
        let (tracker, _, _) = tracker();
        assert_eq!(tracker.get_status("never").await, JobStatus::new("never"));
    }

    #[tokio::test]
    async fn start_marks_running_until_finished() {
        let (tracker, _, clock) = tracker();
        tracker.record_start("cleanup").await;

        let status = tracker.get_status("cleanup").await;
        assert_eq!(status.current_run_started_at, Some(clock.now()));

        tracker.record_success("cleanup").await;
        assert!(!tracker.get_status("cleanup").await.is_running());
    }

    #[tokio::test]
    async fn running_marker_expires_after_an_hour() {
        let (tracker, _, clock) = tracker();
        tracker.record_start("stuck").await;
        clock.advance_secs(3600);
        assert!(!tracker.get_status("stuck").await.is_running());
    }

    #[tokio::test]
    async fn failures_accumulate_and_success_resets_streak() {
        let (tracker, _, _) = tracker();

        assert_eq!(tracker.record_failure("sync", "timeout").await, 1);
        assert_eq!(tracker.record_failure("sync", "timeout again").await, 2);

        let status = tracker.get_status("sync").await;
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.failure_count, 2);
        assert_eq!(status.last_error.as_deref(), Some("timeout again"));
        assert!(status.last_failure.is_some());

        tracker.record_success("sync").await;
        let status = tracker.get_status("sync").await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.failure_count, 2);

        assert_eq!(tracker.record_failure("sync", "again").await, 1);
    }

    #[tokio::test]
    async fn error_text_is_truncated_to_500_chars() {
        let (tracker, _, _) = tracker();
        let long = "é".repeat(800);
        tracker.record_failure("big", &long).await;

        let stored = tracker.get_status("big").await.last_error.unwrap();
        assert_eq!(stored.chars().count(), 500);
    }

    #[tokio::test]
    async fn status_keys_expire_after_retention() {
        let (tracker, store, clock) = tracker();
        tracker.record_failure("old", "boom").await;
        clock.advance_secs(7 * 24 * 3600);

        assert_eq!(tracker.get_status("old").await, JobStatus::new("old"));
        assert!(store.keys("scheduler:job:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_names_are_discovered_from_keys() {
        let (tracker, store, _) = tracker();
        tracker.record_success("b:with:colons").await;
        tracker.record_failure("a", "x").await;
        store.set("scheduler:job:zzz:unrelated", "1", None).await.unwrap();

        assert_eq!(tracker.job_names().await, vec!["a".to_string(), "b:with:colons".to_string()]);
        assert_eq!(tracker.all_statuses().await.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_in_process_state_when_store_is_down() {
        let clock = ManualClock::at_epoch_secs(1_700_000_000);
        let tracker = JobTracker::new(
            Arc::new(UnreachableStore),
            Arc::new(clock),
            &ReliabilityConfig::default(),
        );

        tracker.record_start("job").await;
        assert!(tracker.get_status("job").await.is_running());

        assert_eq!(tracker.record_failure("job", "e1").await, 1);
        assert_eq!(tracker.record_failure("job", "e2").await, 2);
        tracker.record_success("job").await;

        let status = tracker.get_status("job").await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.failure_count, 2);
        assert_eq!(tracker.job_names().await, vec!["job".to_string()]);
    }

    #[tokio::test]
    async fn streak_survives_a_store_error_after_the_increment() {
        let clock = ManualClock::at_epoch_secs(1_700_000_000);
        let store = Arc::new(FlakyExpire {
            inner: InMemoryTtlStore::new(Arc::new(clock.clone())),
            suffix: ":failure_count",
            armed: AtomicBool::new(false),
        });
        let tracker = JobTracker::new(store.clone(), Arc::new(clock), &ReliabilityConfig::default());

        assert_eq!(tracker.record_failure("sync", "e1").await, 1);
        assert_eq!(tracker.record_failure("sync", "e2").await, 2);

        store.armed.store(true, Ordering::SeqCst);
        assert_eq!(tracker.record_failure("sync", "e3").await, 3);
        assert!(!store.armed.load(Ordering::SeqCst));

        let status = tracker.get_status("sync").await;
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.failure_count, 3);
        assert_eq!(status.last_error.as_deref(), Some("e3"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_error("abc", 5), "abc");
        assert_eq!(truncate_error("abcdef", 3), "abc");
        assert_eq!(truncate_error("ééé", 2), "éé");
    }
}
