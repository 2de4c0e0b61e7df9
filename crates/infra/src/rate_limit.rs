//! Fixed-window rate limiting on top of the TTL store.
//!
//! Requests are bucketed into `floor(epoch / window)` windows with one counter
//! per `(scope, identifier, window)`. This is a fixed-window approximation:
//! a burst straddling a window boundary can briefly reach twice the nominal
//! rate. It costs one atomic increment and O(1) memory per active key; a
//! sliding log would cost O(requests).

use std::sync::Arc;

use tracing::{debug, warn};

use hookguard_core::{Clock, ReliabilityConfig};

use crate::store::TtlStore;

pub const SCOPE_WEBHOOK_SENDER: &str = "webhook";
pub const SCOPE_WEBHOOK_GLOBAL: &str = "webhook_global";
pub const SCOPE_AGENT_USER: &str = "agent";

/// Identifier used for scopes that are not keyed per caller.
pub const GLOBAL_IDENTIFIER: &str = "all";

/// A named limit: at most `limit` requests per `window_secs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    pub scope: String,
    pub limit: u64,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub fn new(scope: impl Into<String>, limit: u64, window_secs: u64) -> Self {
        Self {
            scope: scope.into(),
            limit,
            window_secs: window_secs.max(1),
        }
    }

    pub fn per_minute(scope: impl Into<String>, limit: u64) -> Self {
        Self::new(scope, limit, 60)
    }

    pub fn per_hour(scope: impl Into<String>, limit: u64) -> Self {
        Self::new(scope, limit, 3600)
    }

    /// Per-sender webhook ceiling.
    pub fn webhook_sender(config: &ReliabilityConfig) -> Self {
        Self::per_minute(SCOPE_WEBHOOK_SENDER, config.rate_limit_per_identifier_per_minute)
    }

    /// Ceiling across all webhook senders.
    pub fn webhook_global(config: &ReliabilityConfig) -> Self {
        Self::per_minute(SCOPE_WEBHOOK_GLOBAL, config.global_webhook_rate_limit_per_minute)
    }

    /// Per-user ceiling on agent invocations.
    pub fn agent_user(config: &ReliabilityConfig) -> Self {
        Self::per_hour(SCOPE_AGENT_USER, config.agent_rate_limit_per_user_per_hour)
    }
}

/// Outcome of a single limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { count: u64, limit: u64 },
    Limited { limit: u64, retry_after_secs: u64 },
    /// The store could not be reached; the request is let through.
    Degraded,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateLimitDecision::Limited { .. })
    }
}

/// Counter key for one window.
pub fn window_key(scope: &str, identifier: &str, window_start: i64) -> String {
    format!("ratelimit:{scope}:{identifier}:{window_start}")
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn TtlStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check and count one request against an ad-hoc limit.
    pub async fn check_limit(
        &self,
        scope: &str,
        identifier: &str,
        limit: u64,
        window_secs: u64,
    ) -> RateLimitDecision {
        self.check(&RateLimitRule::new(scope, limit, window_secs), identifier)
            .await
    }

    /// Check and count one request against `rule` at the current time.
    pub async fn check(&self, rule: &RateLimitRule, identifier: &str) -> RateLimitDecision {
        self.check_at(rule, identifier, self.clock.epoch_secs()).await
    }

    /// Check and count one request at an explicit Unix time (seconds).
    pub async fn check_at(
        &self,
        rule: &RateLimitRule,
        identifier: &str,
        epoch_secs: i64,
    ) -> RateLimitDecision {
        let window = i64::try_from(rule.window_secs.max(1)).unwrap_or(i64::MAX);
        let window_start = epoch_secs.div_euclid(window);
        let key = window_key(&rule.scope, identifier, window_start);

        let count = match self.store.increment(&key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    scope = %rule.scope,
                    identifier,
                    backend = self.store.backend(),
                    error = %e,
                    "rate limit store unavailable; failing open"
                );
                return RateLimitDecision::Degraded;
            }
        };

        if count == 1 {
            // Tie the counter's lifetime to exactly one window.
            if let Err(e) = self.store.expire(&key, window).await {
                warn!(key = %key, error = %e, "failed to set rate limit window expiry");
            }
        }

        let count = u64::try_from(count).unwrap_or(0);
        if count > rule.limit {
            let retry_after_secs = (window - epoch_secs.rem_euclid(window)) as u64;
            debug!(
                scope = %rule.scope,
                identifier,
                count,
                limit = rule.limit,
                retry_after_secs,
                "rate limit exceeded"
            );
            return RateLimitDecision::Limited {
                limit: rule.limit,
                retry_after_secs,
            };
        }

        RateLimitDecision::Allowed {
            count,
            limit: rule.limit,
        }
    }
}
