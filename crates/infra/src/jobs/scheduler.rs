//! Recurring triggers for background jobs.
//!
//! One tokio task per registered job ticks at a fixed interval and hands each
//! trigger to the [`RetryExecutor`]. Runs of the same job are sequential within
//! a process because each loop awaits its run before the next tick; nothing
//! stops another instance from running the same job concurrently.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{info, warn};

use super::executor::RetryExecutor;
use super::types::RetryPolicy;

pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type JobTask = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A named job and how often to trigger it.
pub struct PeriodicJob {
    name: String,
    interval: Duration,
    policy: Option<RetryPolicy>,
    task: JobTask,
}

impl PeriodicJob {
    pub fn new<F, Fut, E>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task: JobTask = Arc::new(move || {
            let fut = task();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        Self {
            name: name.into(),
            interval: interval.max(Duration::from_millis(1)),
            policy: None,
            task,
        }
    }

    /// Override the executor's default retry policy for this job.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl core::fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct JobScheduler {
    executor: Arc<RetryExecutor>,
    jobs: Vec<PeriodicJob>,
}

impl JobScheduler {
    pub fn new(executor: Arc<RetryExecutor>) -> Self {
        Self {
            executor,
            jobs: Vec::new(),
        }
    }

    pub fn register(&mut self, job: PeriodicJob) -> &mut Self {
        self.jobs.push(job);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(PeriodicJob::name).collect()
    }

    /// Spawn one loop per job. The first trigger fires one interval from now.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = self
            .jobs
            .into_iter()
            .map(|job| {
                let executor = self.executor.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(job_loop(executor, job, shutdown_rx))
            })
            .collect();

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Handle to stop a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every loop to stop and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler loop ended abnormally");
            }
        }
    }
}

async fn job_loop(
    executor: Arc<RetryExecutor>,
    job: PeriodicJob,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + job.interval, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let policy = job
        .policy
        .clone()
        .unwrap_or_else(|| executor.policy().clone());

    info!(
        job = %job.name,
        interval_secs = job.interval.as_secs_f64(),
        "scheduled job started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let task = job.task.clone();
                executor
                    .run_with_policy(&job.name, &policy, move || task())
                    .await;
            }
        }
    }

    info!(job = %job.name, "scheduled job stopped");
}
