//! Service wiring: one store, one clock, and every component built on them.

use std::sync::Arc;
use std::time::Duration;

use hookguard_core::{Clock, ReliabilityConfig, SystemClock};
use hookguard_infra::jobs::{
    DeadLetterQueue, JobScheduler, JobTracker, PeriodicJob, RetryExecutor, RetryPolicy,
};
use hookguard_infra::{
    AlertDispatcher, NotificationThrottle, Notifier, RateLimiter, TracingNotifier, TtlStore,
    WebhookValidator, connect_store,
};

use super::dispatch::{LoggingSink, WebhookSink};

pub const SWEEP_JOB: &str = "store_sweep";
pub const STORE_PING_JOB: &str = "shared_store_ping";

#[derive(Debug)]
pub struct AppServices {
    pub config: ReliabilityConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn TtlStore>,
    pub validator: WebhookValidator,
    pub limiter: RateLimiter,
    pub tracker: Arc<JobTracker>,
    pub dead_letters: Arc<DeadLetterQueue>,
    pub executor: Arc<RetryExecutor>,
    pub sink: Arc<dyn WebhookSink>,
}

/// Production wiring: system clock, store chosen by `connect_store`,
/// log-only alerts and sink.
pub async fn build_services(config: ReliabilityConfig) -> AppServices {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config, clock.clone()).await;
    build_services_with(
        config,
        clock,
        store,
        Arc::new(LoggingSink),
        Arc::new(TracingNotifier),
    )
}

pub fn build_services_with(
    config: ReliabilityConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn TtlStore>,
    sink: Arc<dyn WebhookSink>,
    notifier: Arc<dyn Notifier>,
) -> AppServices {
    let tracker = Arc::new(JobTracker::new(store.clone(), clock.clone(), &config));
    let dead_letters = Arc::new(
        DeadLetterQueue::from_config(&config, clock.clone()).with_durable_store(store.clone()),
    );
    let alerts = Arc::new(AlertDispatcher::new(
        notifier,
        NotificationThrottle::from_config(&config, clock.clone()),
    ));
    let executor = Arc::new(RetryExecutor::from_config(
        &config,
        tracker.clone(),
        dead_letters.clone(),
        alerts,
    ));

    AppServices {
        validator: WebhookValidator::new(&config, store.clone(), clock.clone()),
        limiter: RateLimiter::new(store.clone(), clock.clone()),
        tracker,
        dead_letters,
        executor,
        sink,
        store,
        clock,
        config,
    }
}

/// Housekeeping jobs the binary runs alongside the HTTP server.
pub fn background_jobs(services: &AppServices) -> JobScheduler {
    let mut scheduler = JobScheduler::new(services.executor.clone());
    let interval = Duration::from_secs(services.config.sweep_interval_secs.max(1));

    let store = services.store.clone();
    scheduler.register(
        PeriodicJob::new(SWEEP_JOB, interval, move || {
            let store = store.clone();
            async move {
                let purged = store.sweep_expired().await?;
                if purged > 0 {
                    tracing::debug!(purged, "expired keys swept");
                }
                Ok::<(), hookguard_infra::StoreError>(())
            }
        })
        .with_policy(RetryPolicy::no_retry()),
    );

    // A failing ping shows up in /health/jobs while every check is failing open.
    if services.store.is_shared() {
        let store = services.store.clone();
        scheduler.register(PeriodicJob::new(STORE_PING_JOB, interval, move || {
            let store = store.clone();
            async move { store.ping().await }
        }));
    }

    scheduler
}
