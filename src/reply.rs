//! # Reply Builder
//!
//! Constructs outbound events that carry forward a request's correlation
//! metadata. This is the only place correlation ids are propagated on the
//! server side; effects must never fabricate or rewrite one themselves.

use crate::event::Event;

/// Returns `response` with the correlation id copied verbatim from `source`.
///
/// If `source` carries no correlation id the produced event also carries
/// none and behaves as a plain published event, which is the right shape
/// for pub/sub-only flows.
///
/// ```rust
/// use musubi::event::Event;
/// use musubi::reply::reply;
/// use serde_json::json;
///
/// let request = Event::new("RPC_TEST").with_correlation_id("c-1");
/// let response = reply(&request, Event::new("RPC_TEST_RESULT").with_payload(json!(2)));
/// assert_eq!(response.metadata.correlation_id.as_deref(), Some("c-1"));
/// ```
pub fn reply(source: &Event, mut response: Event) -> Event {
    response.metadata.correlation_id = source.metadata.correlation_id.clone();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_reply_copies_correlation_id() {
        let source = Event::new("RPC_TEST").with_correlation_id("abc-123");
        let response = reply(&source, Event::new("RPC_TEST_RESULT").with_payload(json!(2)));
        assert_eq!(response.event_type, "RPC_TEST_RESULT");
        assert_eq!(response.metadata.correlation_id.as_deref(), Some("abc-123"));
        assert_eq!(response.payload, Some(json!(2)));
    }

    #[test]
    fn test_reply_without_source_correlation_stays_plain() {
        let source = Event::new("TEST");
        let response = reply(&source, Event::new("TEST_RESULT"));
        assert!(response.metadata.correlation_id.is_none());
    }

    #[test]
    fn test_reply_overwrites_fabricated_correlation_id() {
        let source = Event::new("RPC_TEST").with_correlation_id("real");
        let response = reply(
            &source,
            Event::new("RPC_TEST_RESULT").with_correlation_id("fake"),
        );
        assert_eq!(response.metadata.correlation_id.as_deref(), Some("real"));
    }
}
