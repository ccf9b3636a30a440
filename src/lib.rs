//! # MUSUBI: Event Bus with Request/Reply Correlation
//!
//! Musubi lets independent processes exchange typed events over a shared
//! transport and layers a request/reply protocol on top of plain
//! publish/subscribe: a caller emits an event and receives exactly one
//! correlated reply, with timeout and error propagation close to
//! synchronous call semantics.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐ send/emit ┌───────────┐ request  ┌───────────┐
//! │ Caller │──────────▶│ BusClient │─────────▶│ EventBus  │
//! └────────┘           │ (pending  │          │ (dispatch │
//!      ▲               │  table)   │          │  loop)    │
//!      │               └─────┬─────┘          └─────┬─────┘
//!      │                     │ reply channel        │
//!      │                     ▼                      ▼
//!      │               correlation-id      middlewares → effects
//!      └─── resolve ─── matching                │
//!                            ▲                  │ reply(event)
//!                            └──────────────────┘
//! ```
//!
//! - [`event`]: the wire unit — type, optional payload/error, correlation
//!   metadata
//! - [`effect`]: combinators for filtering, merging and fault-isolating
//!   event handlers
//! - [`listener`] / [`event_bus`]: the server side — pure configuration
//!   bound to a live transport
//! - [`client`]: the caller side — fire-and-forget `emit`, correlated
//!   `send` with timeout racing
//! - [`reply`]: carries a request's correlation id onto its reply
//! - [`transport`]: the pluggable boundary to the outside world
//! - [`context`]: explicit dependency injection for capability lookup
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use musubi::client::EventBusClient;
//! use musubi::config::BusConfig;
//! use musubi::context::Context;
//! use musubi::effect::match_event;
//! use musubi::error::BusResult;
//! use musubi::event::Event;
//! use musubi::event_bus::EventBus;
//! use musubi::listener::MessagingListener;
//! use musubi::reply::reply;
//! use musubi::transport::{InMemoryTransport, Transport};
//! use serde_json::json;
//!
//! # async fn example() -> BusResult<()> {
//! let config = BusConfig::default();
//! let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::from_config(&config));
//!
//! let listener = MessagingListener::builder()
//!     .effect(match_event("RPC_TEST").act(|event, _ctx| async move {
//!         let n = event.payload.as_ref().and_then(|p| p.as_i64()).unwrap_or(0);
//!         Ok(vec![reply(
//!             &event,
//!             Event::new("RPC_TEST_RESULT").with_payload(json!(n + 1)),
//!         )])
//!     }))
//!     .build();
//!
//! let bus = EventBus::bind(listener, transport.clone(), Context::default(), &config);
//! let client = EventBusClient::connect(transport, &config);
//!
//! // ClientError converts into the crate-level Error through `?`.
//! let result = client.send(Event::new("RPC_TEST").with_payload(json!(1))).await?;
//! assert_eq!(result.payload, Some(json!(2)));
//!
//! client.close().await;
//! bus.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod effect;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod listener;
pub mod reply;
pub mod transport;
pub mod validator;

// Re-exports
pub use client::EventBusClient;
pub use config::BusConfig;
pub use context::{Context, Token};
pub use effect::{combine_effects, combine_middlewares, match_event, middleware};
pub use error::*;
pub use event::Event;
pub use event_bus::EventBus;
pub use listener::MessagingListener;
pub use reply::reply;
pub use transport::{InMemoryTransport, Transport};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
