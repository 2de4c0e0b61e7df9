//! Shared primitives for the reliability substrate.
//!
//! This crate has no infrastructure concerns: it only defines the clock
//! abstraction, the configuration model and its error type.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MAX_NOTIFICATION_COOLDOWN_MINUTES, ReliabilityConfig};
pub use error::ConfigError;
