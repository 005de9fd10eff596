//! Inbound provider event shape.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event received from an external provider (e.g. a payment processor).
///
/// Stored payloads are replayed through this shape; a payload that does not
/// deserialize into it can never be processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned event identifier.
    pub id: String,
    /// Provider event type (e.g. "invoice.paid").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event body.
    pub data: Value,
    /// Unix timestamp at which the provider created the event.
    #[serde(default)]
    pub created: Option<i64>,
}

impl InboundEvent {
    /// Creates a new inbound event.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            data,
            created: Some(Utc::now().timestamp()),
        }
    }

    /// Parses a stored payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Returns the provider creation time, if present and valid.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let json = r#"{
            "id": "evt_123",
            "type": "invoice.paid",
            "data": {"object": {"amount": 499}},
            "created": 1700000000
        }"#;

        let event = InboundEvent::from_payload(json).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.data["object"]["amount"], 499);
        assert_eq!(event.created_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_created_is_optional() {
        let event = InboundEvent::from_payload(r#"{"id":"evt_1","type":"x","data":{}}"#).unwrap();
        assert!(event.created_at().is_none());
    }

    #[test]
    fn test_malformed_payload_fails() {
        assert!(InboundEvent::from_payload("not json").is_err());
        assert!(InboundEvent::from_payload(r#"{"id":"evt_1"}"#).is_err());
    }
}
