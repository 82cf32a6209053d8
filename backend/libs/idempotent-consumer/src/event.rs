//! Event model accepted from producers.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

/// Maximum topic length (characters)
pub const MAX_TOPIC_LEN: usize = 255;

/// Event published by a producer.
///
/// Deduplication is keyed on `(topic, event_id)`; the same `event_id` on two
/// different topics is two distinct logical events. The payload is carried
/// through untouched and never inspected.
///
/// ```json
/// {
///   "topic": "user.login",
///   "event_id": "evt_5c1f...",
///   "timestamp": "2024-01-01T00:00:00Z",
///   "source": "auth-service",
///   "payload": { "user_id": "123" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Event {
    /// Logical channel
    #[validate(length(min = 1, max = 255, message = "topic must be 1-255 characters"))]
    pub topic: String,

    /// Producer-assigned identifier, unique within a topic
    #[validate(custom(function = "validate_event_id"))]
    pub event_id: String,

    /// Producer-side event time (ISO-8601), not used for ordering
    #[validate(custom(function = "validate_timestamp"))]
    pub timestamp: String,

    /// Originating publisher
    #[validate(length(min = 1, message = "source must not be empty"))]
    pub source: String,

    /// Opaque event body
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(
        topic: impl Into<String>,
        event_id: impl Into<String>,
        timestamp: impl Into<String>,
        source: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
            timestamp: timestamp.into(),
            source: source.into(),
            payload,
        }
    }

    /// Dedup key of this event
    pub fn key(&self) -> (&str, &str) {
        (&self.topic, &self.event_id)
    }
}

/// Batch of events submitted in one request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventBatch {
    #[validate(length(min = 1, message = "batch must contain at least one event"), nested)]
    pub events: Vec<Event>,
}

fn validate_event_id(event_id: &str) -> Result<(), ValidationError> {
    if event_id.trim().is_empty() {
        let mut err = ValidationError::new("empty_event_id");
        err.message = Some("event_id must not be empty".into());
        return Err(err);
    }
    Ok(())
}

fn validate_timestamp(timestamp: &str) -> Result<(), ValidationError> {
    if is_iso8601(timestamp) {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_timestamp");
        err.message = Some("timestamp must be ISO-8601".into());
        Err(err)
    }
}

/// Accepts RFC 3339 (`Z` or numeric offset), offset-less local date-times
/// (minute or second precision) and plain calendar dates.
pub fn is_iso8601(value: &str) -> bool {
    if DateTime::parse_from_rfc3339(value).is_ok() {
        return true;
    }
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        return true;
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        Event::new(
            "user.login",
            "evt-1",
            "2024-01-01T00:00:00Z",
            "auth-service",
            Map::new(),
        )
    }

    #[test]
    fn test_valid_event() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(is_iso8601("2024-01-01T00:00:00Z"));
        assert!(is_iso8601("2024-01-01T00:00:00.123+07:00"));
        assert!(is_iso8601("2024-01-01T00:00:00"));
        assert!(is_iso8601("2024-01-01T00:00:00.5"));
        assert!(is_iso8601("2024-01-01"));
        assert!(is_iso8601("2024-01-01T09:30"));
        assert!(!is_iso8601("2024-02-30"));
        assert!(!is_iso8601("2024-01"));
        assert!(!is_iso8601("yesterday"));
        assert!(!is_iso8601("2024-13-01T00:00:00Z"));
        assert!(!is_iso8601(""));
    }

    #[test]
    fn test_invalid_fields() {
        let mut event = sample();
        event.topic = String::new();
        assert!(event.validate().is_err());

        let mut event = sample();
        event.topic = "t".repeat(256);
        assert!(event.validate().is_err());

        let mut event = sample();
        event.event_id = "   ".to_string();
        let errors = event.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_id"));

        let mut event = sample();
        event.timestamp = "not-a-time".to_string();
        let errors = event.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("timestamp"));

        let mut event = sample();
        event.source = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_long_event_id_accepted() {
        let mut event = sample();
        event.event_id = "x".repeat(1000);
        assert!(event.validate().is_ok());

        let mut event = sample();
        event.timestamp = "2024-01-01".to_string();
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_payload_defaults_to_empty() {
        let event: Event = serde_json::from_value(json!({
            "topic": "orders",
            "event_id": "o-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "source": "shop"
        }))
        .unwrap();
        assert!(event.payload.is_empty());
        assert_eq!(event.key(), ("orders", "o-1"));
    }

    #[test]
    fn test_empty_batch_rejected() {
        let batch = EventBatch { events: vec![] };
        assert!(batch.validate().is_err());

        let batch = EventBatch {
            events: vec![sample()],
        };
        assert!(batch.validate().is_ok());
    }
}
