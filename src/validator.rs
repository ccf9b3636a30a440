//! # Payload Validation
//!
//! Schema checks for inbound event payloads, built on serde. Validation
//! failures are [`EffectError::Validation`] values, so inside an effect they
//! surface to the requester as a structured error reply and never crash the
//! pipeline.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;
use crate::effect::{middleware, EffectError, Middleware};
use crate::event::Event;

/// Deserializes the event payload into `T`.
///
/// A missing payload is treated as JSON `null`. Intended for use at the top
/// of a projection:
///
/// ```rust
/// use musubi::effect::match_event;
/// use musubi::event::Event;
/// use musubi::reply::reply;
/// use musubi::validator::validate_payload;
/// use serde_json::json;
///
/// let rpc = match_event("RPC_TEST").act(|event, _ctx| async move {
///     let n: i64 = validate_payload(&event)?;
///     Ok(vec![reply(
///         &event,
///         Event::new("RPC_TEST_RESULT").with_payload(json!(n + 1)),
///     )])
/// });
/// ```
pub fn validate_payload<T: DeserializeOwned>(event: &Event) -> Result<T, EffectError> {
    let payload = event.payload.clone().unwrap_or(Value::Null);
    serde_json::from_value(payload).map_err(|e| {
        EffectError::Validation(format!(
            "Invalid payload for event {}: {}",
            event.event_type, e
        ))
    })
}

/// Middleware that validates the payload of events of the given type
/// against `T` and passes every other event through untouched.
pub fn event_validator<T: DeserializeOwned + Send + 'static>(
    event_type: impl Into<String>,
) -> Middleware {
    let event_type = event_type.into();
    middleware(move |event: Event, _ctx: Context| {
        let applies = event.matches(&event_type);
        async move {
            if applies {
                validate_payload::<T>(&event)?;
            }
            Ok(vec![event])
        }
    })
}
