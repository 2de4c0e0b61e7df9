//! HTTP surface: webhook ingestion, job health and dead-letter inspection.

pub mod app;
pub mod context;
pub mod middleware;
