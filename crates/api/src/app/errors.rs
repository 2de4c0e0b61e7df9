use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;

use hookguard_infra::WebhookRejection;

pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Map a validator rejection to its HTTP response, carrying `Retry-After`
/// and the configured limit when rate limited.
pub fn rejection_to_response(rejection: &WebhookRejection) -> axum::response::Response {
    let status =
        StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    let mut res = json_error(status, rejection.code(), rejection.to_string());

    let headers = res.headers_mut();
    if let Some(secs) = rejection.retry_after_secs() {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    if let Some(limit) = rejection.limit() {
        headers.insert(
            HeaderName::from_static(RATE_LIMIT_HEADER),
            HeaderValue::from(limit),
        );
    }
    res
}
