//! Hand-off of accepted webhooks to downstream processing.
//!
//! The HTTP response never waits on this: each accepted event is processed on
//! its own spawned task. Failures are logged and dropped; the sender already
//! got its 200.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hookguard_infra::{RateLimitDecision, RateLimitRule};

use super::services::AppServices;

/// An accepted, validated inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub message_id: String,
    pub sender: String,
    pub user_id: String,
    pub timestamp: i64,
    pub payload: serde_json::Value,
}

/// Downstream consumer of accepted events (agent, queue, business logic).
#[async_trait]
pub trait WebhookSink: Send + Sync + core::fmt::Debug {
    async fn handle(&self, event: WebhookEvent) -> anyhow::Result<()>;
}

/// Logs each event. Default sink when nothing else is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl WebhookSink for LoggingSink {
    async fn handle(&self, event: WebhookEvent) -> anyhow::Result<()> {
        info!(
            message_id = %event.message_id,
            sender = %event.sender,
            user_id = %event.user_id,
            "webhook event received"
        );
        Ok(())
    }
}

pub fn spawn_dispatch(services: Arc<AppServices>, event: WebhookEvent) -> JoinHandle<()> {
    tokio::spawn(async move { dispatch(&services, event).await })
}

/// Charge the per-user agent quota, then hand the event to the sink.
pub async fn dispatch(services: &AppServices, event: WebhookEvent) {
    let rule = RateLimitRule::agent_user(&services.config);
    match services.limiter.check(&rule, &event.user_id).await {
        RateLimitDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            warn!(
                message_id = %event.message_id,
                user_id = %event.user_id,
                limit,
                retry_after_secs,
                "agent quota exhausted; event acknowledged but not dispatched"
            );
            return;
        }
        RateLimitDecision::Allowed { .. } | RateLimitDecision::Degraded => {}
    }

    let message_id = event.message_id.clone();
    if let Err(e) = services.sink.handle(event).await {
        warn!(message_id = %message_id, error = %e, "webhook dispatch failed");
    }
}
