//! Infrastructure layer: TTL stores, rate limiting, webhook validation and
//! background job resilience.
//!
//! Every component takes its store and clock at construction. The binary
//! selects the store once at startup (`store::connect_store`) and shares it.

pub mod health;
pub mod jobs;
pub mod notify;
pub mod rate_limit;
pub mod store;
pub mod webhook;

pub use health::{HealthReport, HealthState};
pub use notify::{AlertDispatcher, NotificationThrottle, Notifier, NotifyError, TracingNotifier};
pub use rate_limit::{RateLimitDecision, RateLimitRule, RateLimiter};
pub use store::{InMemoryTtlStore, StoreError, TtlStore, connect_store};
pub use webhook::{InboundWebhook, WebhookRejection, WebhookValidator, WebhookVerdict};
