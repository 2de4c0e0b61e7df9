use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use hookguard_infra::HealthReport;

use crate::app::services::AppServices;

/// Liveness: the process is up and serving.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Job health: 200 when healthy, 503 when degraded or critical.
pub async fn job_health(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let report = HealthReport::collect(
        &services.tracker,
        &services.dead_letters,
        services.store.backend(),
    )
    .await;
    let status =
        StatusCode::from_u16(report.http_status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (status, Json(report)).into_response()
}
