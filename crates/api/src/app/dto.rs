use serde::{Deserialize, Serialize};

use hookguard_infra::jobs::DeadLetterEntry;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /webhooks/inbound`. Fields beyond the envelope are kept as
/// the event payload.
#[derive(Debug, Deserialize)]
pub struct InboundWebhookRequest {
    #[serde(default)]
    pub message_id: String,
    pub timestamp: RawTimestamp,
    pub sender: String,
    /// Identity the agent quota is charged to; defaults to the sender.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Senders disagree on whether the timestamp is a JSON string or number.
/// Either is accepted here; the validator decides whether it is usable.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Number(serde_json::Number),
}

impl RawTimestamp {
    pub fn as_text(&self) -> String {
        match self {
            RawTimestamp::Text(s) => s.clone(),
            RawTimestamp::Number(n) => n.to_string(),
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WebhookAck<'a> {
    pub status: &'static str,
    pub message_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterList {
    pub count: usize,
    pub capacity: usize,
    pub entries: Vec<DeadLetterEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_accepts_string_or_number() {
        let a: InboundWebhookRequest = serde_json::from_str(
            r#"{"message_id":"m1","timestamp":"1700000000","sender":"+1"}"#,
        )
        .unwrap();
        let b: InboundWebhookRequest = serde_json::from_str(
            r#"{"message_id":"m1","timestamp":1700000000,"sender":"+1"}"#,
        )
        .unwrap();
        assert_eq!(a.timestamp.as_text(), "1700000000");
        assert_eq!(b.timestamp.as_text(), "1700000000");
    }

    #[test]
    fn extra_fields_become_payload() {
        let req: InboundWebhookRequest = serde_json::from_str(
            r#"{"message_id":"m1","timestamp":"1","sender":"+1","text":"hi","user_id":"u1"}"#,
        )
        .unwrap();
        assert_eq!(req.payload["text"], "hi");
        assert!(!req.payload.contains_key("user_id"));
        assert_eq!(req.user_id.as_deref(), Some("u1"));
    }
}
