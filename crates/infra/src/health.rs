//! Aggregate health derived from job status and the dead-letter queue.

use serde::Serialize;

use crate::jobs::{DeadLetterQueue, JobStatus, JobTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No job is failing and nothing is dead-lettered.
    Healthy,
    /// At least one job has a consecutive failure.
    Degraded,
    /// The dead-letter queue is non-empty.
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub jobs: Vec<JobStatus>,
    pub dead_letter_count: usize,
    pub store_backend: &'static str,
}

impl HealthReport {
    pub fn evaluate(
        jobs: Vec<JobStatus>,
        dead_letter_count: usize,
        store_backend: &'static str,
    ) -> Self {
        let status = if dead_letter_count > 0 {
            HealthState::Critical
        } else if jobs.iter().any(JobStatus::is_failing) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        Self {
            status,
            jobs,
            dead_letter_count,
            store_backend,
        }
    }

    pub async fn collect(
        tracker: &JobTracker,
        dead_letters: &DeadLetterQueue,
        store_backend: &'static str,
    ) -> Self {
        Self::evaluate(tracker.all_statuses().await, dead_letters.len(), store_backend)
    }

    /// 200 when healthy, 503 otherwise.
    pub fn http_status(&self) -> u16 {
        match self.status {
            HealthState::Healthy => 200,
            HealthState::Degraded | HealthState::Critical => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(name: &str, n: u32) -> JobStatus {
        JobStatus {
            consecutive_failures: n,
            ..JobStatus::new(name)
        }
    }

    #[test]
    fn healthy_when_nothing_fails() {
        let report = HealthReport::evaluate(vec![JobStatus::new("a")], 0, "in-memory");
        assert_eq!(report.status, HealthState::Healthy);
        assert_eq!(report.http_status(), 200);
    }

    #[test]
    fn one_failing_job_degrades() {
        let report =
            HealthReport::evaluate(vec![JobStatus::new("a"), failing("b", 1)], 0, "in-memory");
        assert_eq!(report.status, HealthState::Degraded);
        assert_eq!(report.http_status(), 503);
    }

    #[test]
    fn dead_letters_are_critical_even_without_failing_jobs() {
        let report = HealthReport::evaluate(vec![JobStatus::new("a")], 1, "in-memory");
        assert_eq!(report.status, HealthState::Critical);
        assert_eq!(report.http_status(), 503);
    }

    #[test]
    fn serializes_state_in_snake_case() {
        let report = HealthReport::evaluate(vec![], 0, "redis");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store_backend"], "redis");
    }
}
