//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/clock selection and component construction
//! - `dispatch.rs`: background hand-off of accepted webhooks
//! - `routes/`: HTTP handlers (one file per area)
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dispatch;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around already-constructed services.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let admin_auth = middleware::AdminAuth {
        token: services.config.admin_token.as_deref().map(Arc::from),
    };

    let admin = routes::admin::router().layer(axum::middleware::from_fn_with_state(
        admin_auth,
        middleware::admin_auth,
    ));

    Router::new()
        .merge(routes::router())
        .nest("/admin", admin)
        .layer(Extension(services))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_context)))
}
