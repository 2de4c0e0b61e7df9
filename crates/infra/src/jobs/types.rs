//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hookguard_core::ReliabilityConfig;

/// Observable run state of one job, assembled by the tracker.
///
/// A job that has never been seen reports every field at its zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Most recent terminal error, truncated.
    pub last_error: Option<String>,
    /// Terminal failures since the last success.
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    /// Set while a run is in flight. Advisory only, not a lock.
    pub current_run_started_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_run_started_at.is_some()
    }

    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(n-1)
    #[default]
    Exponential,
}

/// Retry policy for one scheduler trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per trigger, the first one included (at least 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        Self {
            max_attempts: config.job_retry_count.max(1),
            base_delay: secs_f64(config.job_base_delay_secs),
            max_delay: secs_f64(config.job_max_delay_secs),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Single attempt, no retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Retries without sleeping in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to sleep after `failed_attempts` failures (1-indexed).
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(failed_attempts - 1);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay.max(self.base_delay))
    }

    /// Whether another attempt is allowed after `attempts` have run.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// What a call to the retry executor ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded {
        attempts: u32,
    },
    Failed {
        error: String,
        attempts: u32,
        consecutive_failures: u32,
        dead_lettered: bool,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobOutcome::Succeeded { attempts } | JobOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(
            self,
            JobOutcome::Failed {
                dead_lettered: true,
                ..
            }
        )
    }
}

/// A permanently failed execution kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub job_name: String,
    pub error: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(
        job_name: impl Into<String>,
        error: impl Into<String>,
        context: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_name: job_name.into(),
            error: error.into(),
            context: context.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_from_base() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(60));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(RetryPolicy::immediate(4).delay_for_attempt(2), Duration::ZERO);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from_config(&ReliabilityConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn unseen_job_status_is_zeroed() {
        let status = JobStatus::new("cleanup");
        assert_eq!(status.job_name, "cleanup");
        assert!(!status.is_running());
        assert!(!status.is_failing());
        assert_eq!(status.success_count, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn outcome_accessors() {
        let ok = JobOutcome::Succeeded { attempts: 2 };
        assert!(ok.is_success());
        assert_eq!(ok.attempts(), 2);

        let failed = JobOutcome::Failed {
            error: "boom".into(),
            attempts: 3,
            consecutive_failures: 3,
            dead_lettered: true,
        };
        assert!(!failed.is_success());
        assert!(failed.is_dead_lettered());
    }
}
