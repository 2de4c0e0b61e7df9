//! Background job resilience: tracking, retry with backoff, dead letters.
//!
//! - `JobTracker`: per-job status persisted on the TTL store
//! - `RetryExecutor`: runs one trigger of a job with retries and escalation
//! - `DeadLetterQueue`: bounded buffer of persistently failing runs
//! - `JobScheduler`: interval triggers feeding the executor

pub mod dead_letter;
pub mod executor;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use dead_letter::DeadLetterQueue;
pub use executor::RetryExecutor;
pub use scheduler::{JobScheduler, PeriodicJob, SchedulerHandle};
pub use tracker::JobTracker;
pub use types::{BackoffStrategy, DeadLetterEntry, JobOutcome, JobStatus, RetryPolicy};
