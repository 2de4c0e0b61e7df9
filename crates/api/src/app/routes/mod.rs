use axum::{
    Router,
    routing::{get, post},
};

pub mod admin;
pub mod system;
pub mod webhooks;

/// Public routes: webhook ingestion and health.
pub fn router() -> Router {
    Router::new()
        .route("/webhooks/inbound", post(webhooks::inbound))
        .route("/health", get(system::health))
        .route("/health/jobs", get(system::job_health))
}
