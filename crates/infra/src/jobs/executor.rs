//! Retry-with-backoff executor.
//!
//! Wraps one scheduler trigger of a job: attempts it up to the policy's limit,
//! sleeps between attempts, and on exhaustion records the failure, alerts,
//! and dead-letters persistent failures. Nothing a job does escapes `run`.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use hookguard_core::ReliabilityConfig;

use super::dead_letter::DeadLetterQueue;
use super::tracker::JobTracker;
use super::types::{JobOutcome, RetryPolicy};
use crate::notify::AlertDispatcher;

#[derive(Debug)]
pub struct RetryExecutor {
    tracker: Arc<JobTracker>,
    dead_letters: Arc<DeadLetterQueue>,
    alerts: Arc<AlertDispatcher>,
    policy: RetryPolicy,
    dead_letter_threshold: u32,
}

impl RetryExecutor {
    pub fn new(
        tracker: Arc<JobTracker>,
        dead_letters: Arc<DeadLetterQueue>,
        alerts: Arc<AlertDispatcher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            tracker,
            dead_letters,
            alerts,
            policy,
            dead_letter_threshold: 3,
        }
    }

    pub fn from_config(
        config: &ReliabilityConfig,
        tracker: Arc<JobTracker>,
        dead_letters: Arc<DeadLetterQueue>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self::new(tracker, dead_letters, alerts, RetryPolicy::from_config(config))
            .with_dead_letter_threshold(config.dead_letter_threshold)
    }

    pub fn with_dead_letter_threshold(mut self, threshold: u32) -> Self {
        self.dead_letter_threshold = threshold.max(1);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Run `job` under the executor's default policy.
    pub async fn run<F, Fut, E>(&self, job_name: &str, job: F) -> JobOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let policy = self.policy.clone();
        self.run_with_policy(job_name, &policy, job).await
    }

    /// Run `job` with an explicit policy.
    ///
    /// Each attempt is spawned as its own task, so a panic inside the job is
    /// reported as a failed attempt instead of unwinding into the caller.
    pub async fn run_with_policy<F, Fut, E>(
        &self,
        job_name: &str,
        policy: &RetryPolicy,
        mut job: F,
    ) -> JobOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.tracker.record_start(job_name).await;

        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            match run_attempt(job()).await {
                Ok(()) => {
                    self.tracker.record_success(job_name).await;
                    info!(job = job_name, attempts, "job succeeded");
                    return JobOutcome::Succeeded { attempts };
                }
                Err(e) => {
                    warn!(
                        job = job_name,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "job attempt failed"
                    );
                    last_error = e;
                }
            }

            if policy.should_retry(attempts) {
                let delay = policy.delay_for_attempt(attempts);
                debug!(job = job_name, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::time::sleep(delay).await;
            }
        }

        self.escalate(job_name, last_error, attempts).await
    }

    async fn escalate(&self, job_name: &str, error: String, attempts: u32) -> JobOutcome {
        let consecutive = self.tracker.record_failure(job_name, &error).await;
        error!(
            job = job_name,
            attempts,
            consecutive_failures = consecutive,
            error = %error,
            "job failed after all attempts"
        );

        self.alerts
            .alert(
                &format!("job_failure:{job_name}"),
                &format!(
                    "Job '{job_name}' failed after {attempts} attempt(s) \
                     ({consecutive} consecutive): {error}"
                ),
            )
            .await;

        let dead_lettered = consecutive >= self.dead_letter_threshold;
        if dead_lettered {
            let context = format!("attempts={attempts} consecutive_failures={consecutive}");
            self.dead_letters.add(job_name, &error, &context).await;
            self.alerts
                .alert(
                    &format!("dead_letter:{job_name}"),
                    &format!(
                        "Job '{job_name}' dead-lettered after {consecutive} consecutive \
                         failures: {error}"
                    ),
                )
                .await;
        }

        JobOutcome::Failed {
            error,
            attempts,
            consecutive_failures: consecutive,
            dead_lettered,
        }
    }
}

async fn run_attempt<Fut, E>(attempt: Fut) -> Result<(), String>
where
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    match tokio::spawn(attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join) if join.is_panic() => Err(format!(
            "job panicked: {}",
            panic_message(join.into_panic().as_ref())
        )),
        Err(join) => Err(format!("job task cancelled: {join}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
