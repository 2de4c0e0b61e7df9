//! Inbound webhook security checks.
//!
//! Four stages run in a fixed order and the first failure wins:
//!
//! 1. authenticity (HMAC-SHA256 signature, skipped when no secret is configured)
//! 2. freshness (timestamp within `max_age_secs`, not in the future)
//! 3. idempotency (message id consumed once per `nonce_ttl_secs`)
//! 4. rate limit (per sender, then across all senders)
//!
//! Stages 3 and 4 depend on the TTL store. When it is unreachable they pass:
//! keeping ingestion available matters more than perfect replay protection.
//!
//! A delivery refused by stage 4 gives its message id back, so the sender's
//! retry after `Retry-After` is processed instead of being called a replay.
//! This races with a copy of the same message arriving while the original is
//! between stages 3 and 4: the copy is answered `duplicate`, the original is
//! answered 429, and the event is processed only when the sender retries the
//! rate-limited delivery. A sender that stops retrying once any copy is
//! acknowledged loses that event. Closing the window needs a compare-and-delete
//! the store interface does not offer.

use std::sync::Arc;

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use hookguard_core::{Clock, ReliabilityConfig};

use crate::rate_limit::{GLOBAL_IDENTIFIER, RateLimitDecision, RateLimitRule, RateLimiter};
use crate::store::TtlStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body (optionally `sha256=`-prefixed).
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Raw fields of an inbound delivery, as received.
#[derive(Debug, Clone, Copy)]
pub struct InboundWebhook<'a> {
    pub message_id: &'a str,
    /// Claimed event time, Unix seconds as text.
    pub timestamp: &'a str,
    pub sender: &'a str,
    /// Signature header exactly as received; not necessarily valid text.
    pub signature: Option<&'a [u8]>,
    /// Exact bytes the signature was computed over.
    pub body: &'a [u8],
}

/// Why a delivery was refused. Each variant maps to the HTTP status the
/// caller must return verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookRejection {
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("invalid timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("timestamp is {skew_secs}s in the future")]
    FutureTimestamp { skew_secs: i64 },

    #[error("webhook is too old ({age_secs}s > {max_age_secs}s)")]
    Stale { age_secs: i64, max_age_secs: i64 },

    #[error("missing message id")]
    MissingMessageId,

    #[error("duplicate message {0}")]
    Duplicate(String),

    #[error("rate limit exceeded ({scope})")]
    RateLimited {
        scope: String,
        limit: u64,
        retry_after_secs: u64,
    },
}

impl WebhookRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookRejection::MissingSignature => 401,
            WebhookRejection::InvalidSignature => 403,
            WebhookRejection::MalformedTimestamp(_)
            | WebhookRejection::FutureTimestamp { .. }
            | WebhookRejection::Stale { .. }
            | WebhookRejection::MissingMessageId => 400,
            // 2xx so the sender stops redelivering.
            WebhookRejection::Duplicate(_) => 200,
            WebhookRejection::RateLimited { .. } => 429,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookRejection::MissingSignature => "missing_signature",
            WebhookRejection::InvalidSignature => "invalid_signature",
            WebhookRejection::MalformedTimestamp(_) => "invalid_timestamp",
            WebhookRejection::FutureTimestamp { .. } => "timestamp_in_future",
            WebhookRejection::Stale { .. } => "timestamp_too_old",
            WebhookRejection::MissingMessageId => "missing_message_id",
            WebhookRejection::Duplicate(_) => "duplicate",
            WebhookRejection::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            WebhookRejection::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            WebhookRejection::RateLimited { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, WebhookRejection::Duplicate(_))
    }
}

/// Result of validating one delivery.
pub type WebhookVerdict = Result<(), WebhookRejection>;

/// Nonce key for a message id.
pub fn nonce_key(message_id: &str) -> String {
    format!("webhook:nonce:{message_id}")
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone)]
pub struct WebhookValidator {
    secret: Option<String>,
    max_age_secs: i64,
    nonce_ttl_secs: u64,
    sender_rule: RateLimitRule,
    global_rule: RateLimitRule,
    store: Arc<dyn TtlStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl WebhookValidator {
    pub fn new(config: &ReliabilityConfig, store: Arc<dyn TtlStore>, clock: Arc<dyn Clock>) -> Self {
        if config.webhook_secret.is_none() {
            warn!("no webhook secret configured; signature verification is disabled");
        }
        Self {
            secret: config.webhook_secret.clone(),
            max_age_secs: config.max_age_secs,
            nonce_ttl_secs: config.nonce_ttl_secs,
            sender_rule: RateLimitRule::webhook_sender(config),
            global_rule: RateLimitRule::webhook_global(config),
            limiter: RateLimiter::new(store.clone(), clock.clone()),
            store,
            clock,
        }
    }

    /// Run every stage at the current time.
    pub async fn validate(&self, hook: &InboundWebhook<'_>) -> WebhookVerdict {
        self.validate_at(hook, self.clock.epoch_secs()).await
    }

    /// Run every stage at an explicit Unix time (seconds).
    pub async fn validate_at(&self, hook: &InboundWebhook<'_>, now: i64) -> WebhookVerdict {
        self.check_authenticity(hook)?;
        self.check_freshness(hook.timestamp, now)?;
        self.check_idempotency(hook.message_id).await?;

        if let Err(rejection) = self.check_rate_limit(hook.sender, now).await {
            self.release_nonce(hook.message_id).await;
            return Err(rejection);
        }

        debug!(message_id = hook.message_id, sender = hook.sender, "webhook accepted");
        Ok(())
    }

    pub fn check_authenticity(&self, hook: &InboundWebhook<'_>) -> WebhookVerdict {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        let provided = hook
            .signature
            .map(<[u8]>::trim_ascii)
            .filter(|s| !s.is_empty())
            .ok_or(WebhookRejection::MissingSignature)?;
        let provided = provided.strip_prefix(b"sha256=").unwrap_or(provided);

        let expected = sign(secret, hook.body);
        let provided = provided.to_ascii_lowercase();
        if provided.len() == expected.len() && constant_time_eq(&provided, expected.as_bytes())
        {
            Ok(())
        } else {
            warn!(sender = hook.sender, "webhook signature mismatch");
            Err(WebhookRejection::InvalidSignature)
        }
    }

    pub fn check_freshness(&self, timestamp: &str, now: i64) -> WebhookVerdict {
        let claimed: u64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookRejection::MalformedTimestamp(timestamp.to_string()))?;

        let Ok(claimed) = i64::try_from(claimed) else {
            return Err(WebhookRejection::FutureTimestamp { skew_secs: i64::MAX });
        };

        let age_secs = now.saturating_sub(claimed);
        if age_secs < 0 {
            return Err(WebhookRejection::FutureTimestamp {
                skew_secs: -age_secs,
            });
        }
        if age_secs > self.max_age_secs {
            return Err(WebhookRejection::Stale {
                age_secs,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(())
    }

    pub async fn check_idempotency(&self, message_id: &str) -> WebhookVerdict {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(WebhookRejection::MissingMessageId);
        }

        match self
            .store
            .set_if_absent(&nonce_key(message_id), "1", Some(self.nonce_ttl_secs))
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(message_id, "duplicate webhook delivery");
                Err(WebhookRejection::Duplicate(message_id.to_string()))
            }
            Err(e) => {
                warn!(
                    message_id,
                    backend = self.store.backend(),
                    error = %e,
                    "nonce store unavailable; skipping replay protection"
                );
                Ok(())
            }
        }
    }

    /// Give a consumed message id back.
    pub async fn release_nonce(&self, message_id: &str) {
        let key = nonce_key(message_id.trim());
        if let Err(e) = self.store.delete(&[key.as_str()]).await {
            warn!(message_id, error = %e, "failed to release nonce");
        }
    }

    pub async fn check_rate_limit(&self, sender: &str, now: i64) -> WebhookVerdict {
        for (rule, identifier) in [
            (&self.sender_rule, sender),
            (&self.global_rule, GLOBAL_IDENTIFIER),
        ] {
            if let RateLimitDecision::Limited {
                limit,
                retry_after_secs,
            } = self.limiter.check_at(rule, identifier, now).await
            {
                warn!(scope = %rule.scope, sender, limit, retry_after_secs, "webhook rate limited");
                return Err(WebhookRejection::RateLimited {
                    scope: rule.scope.clone(),
                    limit,
                    retry_after_secs,
                });
            }
        }
        Ok(())
    }
}
