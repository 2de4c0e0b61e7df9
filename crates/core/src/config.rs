//! Reliability configuration.
//!
//! Defaults match the documented production values; every field can be
//! overridden through a `HOOKGUARD_*` environment variable.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "HOOKGUARD_";

/// Longest accepted alert cooldown (one year).
pub const MAX_NOTIFICATION_COOLDOWN_MINUTES: i64 = 366 * 24 * 60;

/// Tunables for webhook protection and background job resilience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Shared secret for webhook signatures. `None` disables the authenticity check.
    pub webhook_secret: Option<String>,
    /// Maximum accepted age of a webhook timestamp.
    pub max_age_secs: i64,
    /// Lifetime of a consumed message nonce. Should be at least twice `max_age_secs`.
    pub nonce_ttl_secs: u64,
    pub rate_limit_per_identifier_per_minute: u64,
    pub global_webhook_rate_limit_per_minute: u64,
    pub agent_rate_limit_per_user_per_hour: u64,

    /// Attempts per scheduler trigger (including the first).
    pub job_retry_count: u32,
    pub job_base_delay_secs: f64,
    /// Upper bound for a single backoff sleep.
    pub job_max_delay_secs: f64,
    /// Consecutive terminal failures before a run is dead-lettered.
    pub dead_letter_threshold: u32,
    pub dead_letter_capacity: usize,
    pub dead_letter_retention_days: u64,
    pub notification_cooldown_minutes: i64,

    pub job_status_ttl_secs: u64,
    pub running_marker_ttl_secs: u64,
    pub max_error_len: usize,

    /// Shared store URL (e.g. `redis://127.0.0.1:6379`). `None` keeps state in-process.
    pub redis_url: Option<String>,
    /// Bound on every shared-store round trip.
    pub store_timeout_ms: u64,
    /// Period of the proactive purge of the in-process store.
    pub sweep_interval_secs: u64,
    pub bind_addr: String,
    /// Bearer token for the operator routes. `None` leaves them open.
    pub admin_token: Option<String>,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            max_age_secs: 300,
            nonce_ttl_secs: 600,
            rate_limit_per_identifier_per_minute: 20,
            global_webhook_rate_limit_per_minute: 60,
            agent_rate_limit_per_user_per_hour: 50,
            job_retry_count: 3,
            job_base_delay_secs: 2.0,
            job_max_delay_secs: 60.0,
            dead_letter_threshold: 3,
            dead_letter_capacity: 100,
            dead_letter_retention_days: 30,
            notification_cooldown_minutes: 60,
            job_status_ttl_secs: 7 * 24 * 60 * 60,
            running_marker_ttl_secs: 60 * 60,
            max_error_len: 500,
            redis_url: None,
            store_timeout_ms: 500,
            sweep_interval_secs: 60,
            bind_addr: "0.0.0.0:8080".to_string(),
            admin_token: None,
        }
    }
}

impl ReliabilityConfig {
    /// Load defaults overlaid with `HOOKGUARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load defaults overlaid with values from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut cfg = Self::default();

        cfg.webhook_secret = get("WEBHOOK_SECRET");
        cfg.redis_url = get("REDIS_URL");
        cfg.admin_token = get("ADMIN_TOKEN");
        if let Some(addr) = get("BIND_ADDR") {
            cfg.bind_addr = addr;
        }

        overlay(&get, "MAX_AGE_SECS", &mut cfg.max_age_secs)?;
        overlay(&get, "NONCE_TTL_SECS", &mut cfg.nonce_ttl_secs)?;
        overlay(
            &get,
            "RATE_LIMIT_PER_IDENTIFIER_PER_MINUTE",
            &mut cfg.rate_limit_per_identifier_per_minute,
        )?;
        overlay(
            &get,
            "GLOBAL_WEBHOOK_RATE_LIMIT_PER_MINUTE",
            &mut cfg.global_webhook_rate_limit_per_minute,
        )?;
        overlay(
            &get,
            "AGENT_RATE_LIMIT_PER_USER_PER_HOUR",
            &mut cfg.agent_rate_limit_per_user_per_hour,
        )?;
        overlay(&get, "JOB_RETRY_COUNT", &mut cfg.job_retry_count)?;
        overlay(&get, "JOB_BASE_DELAY_SECS", &mut cfg.job_base_delay_secs)?;
        overlay(&get, "JOB_MAX_DELAY_SECS", &mut cfg.job_max_delay_secs)?;
        overlay(&get, "DEAD_LETTER_THRESHOLD", &mut cfg.dead_letter_threshold)?;
        overlay(&get, "DEAD_LETTER_CAPACITY", &mut cfg.dead_letter_capacity)?;
        overlay(
            &get,
            "DEAD_LETTER_RETENTION_DAYS",
            &mut cfg.dead_letter_retention_days,
        )?;
        overlay(
            &get,
            "NOTIFICATION_COOLDOWN_MINUTES",
            &mut cfg.notification_cooldown_minutes,
        )?;
        overlay(&get, "JOB_STATUS_TTL_SECS", &mut cfg.job_status_ttl_secs)?;
        overlay(&get, "RUNNING_MARKER_TTL_SECS", &mut cfg.running_marker_ttl_secs)?;
        overlay(&get, "MAX_ERROR_LEN", &mut cfg.max_error_len)?;
        overlay(&get, "STORE_TIMEOUT_MS", &mut cfg.store_timeout_ms)?;
        overlay(&get, "SWEEP_INTERVAL_SECS", &mut cfg.sweep_interval_secs)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would make the substrate misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_age_secs <= 0 {
            return Err(ConfigError::invalid("max_age_secs must be > 0"));
        }
        if self.nonce_ttl_secs == 0 {
            return Err(ConfigError::invalid("nonce_ttl_secs must be > 0"));
        }
        if self.rate_limit_per_identifier_per_minute == 0
            || self.global_webhook_rate_limit_per_minute == 0
            || self.agent_rate_limit_per_user_per_hour == 0
        {
            return Err(ConfigError::invalid("rate limits must be > 0"));
        }
        if self.job_retry_count == 0 {
            return Err(ConfigError::invalid("job_retry_count must be >= 1"));
        }
        if !self.job_base_delay_secs.is_finite() || self.job_base_delay_secs < 0.0 {
            return Err(ConfigError::invalid("job_base_delay_secs must be >= 0"));
        }
        if !self.job_max_delay_secs.is_finite() || self.job_max_delay_secs < 0.0 {
            return Err(ConfigError::invalid("job_max_delay_secs must be >= 0"));
        }
        if self.dead_letter_capacity == 0 {
            return Err(ConfigError::invalid("dead_letter_capacity must be > 0"));
        }
        if !(0..=MAX_NOTIFICATION_COOLDOWN_MINUTES).contains(&self.notification_cooldown_minutes) {
            return Err(ConfigError::invalid(
                "notification_cooldown_minutes must be between 0 and one year",
            ));
        }

        if self.nonce_ttl_secs < (self.max_age_secs as u64).saturating_mul(2) {
            warn!(
                nonce_ttl_secs = self.nonce_ttl_secs,
                max_age_secs = self.max_age_secs,
                "nonce TTL is shorter than twice the max webhook age; replays near the boundary may slip through"
            );
        }

        Ok(())
    }
}

fn overlay<T, G>(get: &G, suffix: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(suffix) {
        *slot = raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: format!("{ENV_PREFIX}{suffix}"),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
