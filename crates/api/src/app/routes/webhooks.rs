use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{debug, info};

use hookguard_infra::InboundWebhook;
use hookguard_infra::webhook::SIGNATURE_HEADER;

use crate::app::dispatch::{WebhookEvent, spawn_dispatch};
use crate::app::dto::{InboundWebhookRequest, WebhookAck};
use crate::app::{errors, services::AppServices};

/// POST /webhooks/inbound
///
/// The body is read raw so the signature is checked over the exact bytes the
/// sender signed.
pub async fn inbound(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let request: InboundWebhookRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string());
        }
    };

    let timestamp = request.timestamp.as_text();
    let hook = InboundWebhook {
        message_id: &request.message_id,
        timestamp: &timestamp,
        sender: &request.sender,
        signature: headers.get(SIGNATURE_HEADER).map(|v| v.as_bytes()),
        body: &body,
    };

    match services.validator.validate(&hook).await {
        Ok(()) => {}
        Err(rejection) if rejection.is_duplicate() => {
            debug!(message_id = %request.message_id, "duplicate webhook acknowledged");
            return ack("duplicate", &request.message_id);
        }
        Err(rejection) => {
            info!(
                message_id = %request.message_id,
                sender = %request.sender,
                reason = rejection.code(),
                "webhook rejected"
            );
            return errors::rejection_to_response(&rejection);
        }
    }

    let response = ack("accepted", &request.message_id);

    let event = WebhookEvent {
        message_id: request.message_id.trim().to_string(),
        user_id: request
            .user_id
            .clone()
            .unwrap_or_else(|| request.sender.clone()),
        sender: request.sender,
        timestamp: timestamp.trim().parse().unwrap_or_default(),
        payload: serde_json::Value::Object(request.payload),
    };
    spawn_dispatch(services, event);

    response
}

fn ack(status: &'static str, message_id: &str) -> axum::response::Response {
    (StatusCode::OK, Json(WebhookAck { status, message_id })).into_response()
}
