//! # Event Model
//!
//! Events are the fundamental unit of communication on the bus. Every event
//! carries a string `type` used for routing, an optional JSON payload, an
//! optional structured error (present only on failure replies) and optional
//! correlation metadata linking a request to its reply.
//!
//! ## Wire Shape
//!
//! ```text
//! { "type": string, "payload"?: any, "error"?: { "name"?, "message"?, ... },
//!   "metadata"?: { "correlationId"?: string } }
//! ```
//!
//! Events cross a serialization boundary, so equality is structural (by
//! value), never by reference. The presence of `error` is the sole
//! success/failure discriminator on the client side: an event with `error`
//! set is never treated as a success reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation metadata attached to request/reply events.
///
/// `correlation_id` is present iff the event is part of a request/reply
/// exchange; pure pub/sub events carry no metadata at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventMetadata {
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
}

impl EventMetadata {
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none()
    }
}

/// A discrete message exchanged on the bus.
///
/// Construction requires the event type; everything else is optional and
/// added builder-style:
///
/// ```rust
/// use musubi::event::Event;
/// use serde_json::json;
///
/// let event = Event::new("OFFER_CREATED").with_payload(json!({ "id": 42 }));
/// assert!(event.matches("OFFER_CREATED"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Event {
    /// Routing discriminator. Non-empty for every event built by this crate.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Handler-defined payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Structured error value, present only on failure replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Correlation metadata, absent for pure pub/sub events.
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    pub metadata: EventMetadata,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Type-match predicate used by routing.
    ///
    /// Exact string equality only. No prefix or pattern matching.
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Checks that a raw JSON value has the shape of an event, i.e. carries
    /// a non-empty string `type`.
    ///
    /// Used to re-check error-mapping output before it is published as a
    /// reply.
    pub fn is_event_value(value: &Value) -> bool {
        matches!(value.get("type"), Some(Value::String(t)) if !t.is_empty())
    }

    /// Serializes the event to its raw JSON form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
