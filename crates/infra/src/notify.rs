//! Outbound operator alerts and their per-category cooldown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use hookguard_core::{Clock, MAX_NOTIFICATION_COOLDOWN_MINUTES, ReliabilityConfig};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivery channel for alert text (chat, SMS, pager...).
#[async_trait]
pub trait Notifier: Send + Sync + core::fmt::Debug {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log. Used when no external channel is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        error!(alert = message, "operator alert");
        Ok(())
    }
}

/// Remembers when each alert category last fired.
///
/// Process-local on purpose: it only suppresses noise, so losing it on
/// restart (or not sharing it across instances) costs at most a repeated alert.
#[derive(Debug)]
pub struct NotificationThrottle {
    cooldown: Duration,
    last: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            last: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Out-of-range cooldowns are clamped; [`ReliabilityConfig::validate`]
    /// rejects them before this point in the binary.
    pub fn from_config(config: &ReliabilityConfig, clock: Arc<dyn Clock>) -> Self {
        let minutes = config
            .notification_cooldown_minutes
            .clamp(0, MAX_NOTIFICATION_COOLDOWN_MINUTES);
        Self::new(Duration::try_minutes(minutes).unwrap_or_else(Duration::zero), clock)
    }

    pub fn can_notify(&self, category: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .get(category)
            .is_none_or(|last| now - *last >= self.cooldown)
    }

    pub fn record_notified(&self, category: &str) {
        let now = self.clock.now();
        self.lock().insert(category.to_string(), now);
    }

    /// Check and stamp under one lock, so two racing alerts for the same
    /// category cannot both pass.
    pub fn try_acquire(&self, category: &str) -> bool {
        let now = self.clock.now();
        let mut last = self.lock();
        match last.get(category) {
            Some(prev) if now - *prev < self.cooldown => false,
            _ => {
                last.insert(category.to_string(), now);
                true
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A [`Notifier`] gated by a [`NotificationThrottle`].
#[derive(Debug)]
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    throttle: NotificationThrottle,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, throttle: NotificationThrottle) -> Self {
        Self { notifier, throttle }
    }

    /// Send unless the category is cooling down. Returns whether a send was
    /// attempted. Delivery errors are logged and swallowed.
    pub async fn alert(&self, category: &str, message: &str) -> bool {
        if !self.throttle.try_acquire(category) {
            info!(category, "alert suppressed by cooldown");
            return false;
        }
        if let Err(e) = self.notifier.notify(message).await {
            warn!(category, error = %e, "alert delivery failed");
        }
        true
    }
}
