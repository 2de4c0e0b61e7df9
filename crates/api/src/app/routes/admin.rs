//! Operator routes for dead-letter inspection.

use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::get};
use tracing::info;

use crate::app::{dto::DeadLetterList, services::AppServices};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new().route(
        "/dead-letters",
        get(list_dead_letters).delete(clear_dead_letters),
    )
}

/// GET /admin/dead-letters - entries oldest first
pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let entries = services.dead_letters.list();
    let body = DeadLetterList {
        count: entries.len(),
        capacity: services.dead_letters.capacity(),
        entries,
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// DELETE /admin/dead-letters - drop inspected entries
pub async fn clear_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> axum::response::Response {
    let cleared = services.dead_letters.clear();
    info!(cleared, request_id = ctx.request_id(), "dead letters cleared by operator");
    (StatusCode::OK, Json(serde_json::json!({ "cleared": cleared }))).into_response()
}
