//! # Bus Client
//!
//! The client side of the request/reply protocol. [`EventBusClient::emit`]
//! publishes fire-and-forget events; [`EventBusClient::send`] publishes a
//! correlated request and resolves with exactly one reply.
//!
//! ## Correlation
//!
//! Each `send` stamps the event with a fresh correlation id and registers a
//! pending entry holding a oneshot sender. A router task subscribed to the
//! reply channel settles entries by correlation-id equality alone — the
//! reply's type is never inspected, and events without a correlation id are
//! never delivered to `send` callers.
//!
//! ## Timeout Racing
//!
//! With a configured timeout, the timer and the reply race; whichever
//! resolves first wins and the pending entry is removed exactly once. A
//! reply arriving after its timer fired finds no entry and is dropped
//! silently — expected garbage from a slow responder, not an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{instrument, trace, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::event::Event;
use crate::transport::{Channel, Transport, TransportError};

#[derive(Error, Debug)]
pub enum ClientError {
    /// Reply carried a well-formed `{ name, message }` error.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// Reply carried an error without usable name/message; the message is
    /// the canonical JSON text of the whole error value.
    #[error("{0}")]
    RemoteOpaque(String),

    /// No reply arrived within the configured timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The client was closed while the request was outstanding.
    #[error("Client closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// One outstanding request awaiting its reply.
struct PendingRequest {
    sender: oneshot::Sender<Event>,
    /// Original request type, kept for tracing.
    event_type: String,
}

/// Client bound to the same transport family as the bus server.
pub struct EventBusClient {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<String, PendingRequest>>,
    timeout: Option<Duration>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    router_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventBusClient {
    /// Connects to the transport and starts the reply router task.
    ///
    /// The client only needs the transport at bind time — it holds no
    /// reference to any server-side state, so it may be constructed before
    /// or after the bus server.
    pub fn connect(transport: Arc<dyn Transport>, config: &BusConfig) -> Self {
        let pending: Arc<DashMap<String, PendingRequest>> = Arc::new(DashMap::new());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let router_pending = pending.clone();
        let mut receiver = transport.subscribe(Channel::Reply);
        let router_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = receiver.recv() => match received {
                        Ok(event) => route_reply(&router_pending, event),
                        Err(TransportError::Lagged { count }) => {
                            warn!(count, "Reply router lagged, replies skipped");
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        Self {
            transport,
            pending,
            timeout: config.request_timeout,
            shutdown: Mutex::new(Some(shutdown_tx)),
            router_handle: Mutex::new(Some(router_handle)),
        }
    }

    /// Publishes a fire-and-forget event.
    ///
    /// No correlation entry is created and the future resolves as soon as
    /// the transport accepts the publish, without waiting on any handler.
    pub async fn emit(&self, mut event: Event) -> Result<(), ClientError> {
        event.metadata.correlation_id = None;
        self.transport.publish(Channel::Request, event).await?;
        Ok(())
    }

    /// Publishes a correlated request and waits for its single reply.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn send(&self, mut event: Event) -> Result<Event, ClientError> {
        let correlation_id = new_correlation_id();
        event.metadata.correlation_id = Some(correlation_id.clone());

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            correlation_id.clone(),
            PendingRequest {
                sender,
                event_type: event.event_type.clone(),
            },
        );

        if let Err(error) = self.transport.publish(Channel::Request, event).await {
            self.pending.remove(&correlation_id);
            return Err(error.into());
        }

        let reply = self.await_reply(correlation_id, receiver).await?;
        match reply.error {
            Some(ref error) => Err(remote_error(error)),
            None => Ok(reply),
        }
    }

    /// Releases the transport subscription. Safe to call more than once.
    ///
    /// Outstanding requests are rejected with [`ClientError::Closed`]
    /// rather than left pending forever.
    pub async fn close(&self) {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.router_handle.lock().await.take() {
            let _ = handle.await;
        }
        // Dropping the senders wakes every waiting `send` with Closed.
        self.pending.clear();
    }

    async fn await_reply(
        &self,
        correlation_id: String,
        receiver: oneshot::Receiver<Event>,
    ) -> Result<Event, ClientError> {
        match self.timeout {
            Some(timeout) => {
                let sleep = tokio::time::sleep(timeout);
                tokio::pin!(sleep);
                tokio::select! {
                    _ = &mut sleep => {
                        self.pending.remove(&correlation_id);
                        Err(ClientError::Timeout(correlation_id))
                    }
                    result = receiver => result.map_err(|_| ClientError::Closed),
                }
            }
            None => receiver.await.map_err(|_| ClientError::Closed),
        }
    }
}

/// Settles the pending entry matching the reply's correlation id, if any.
///
/// Routing never inspects the reply's type. Uncorrelated events and replies
/// whose entry is already gone (timed out) are dropped silently.
fn route_reply(pending: &DashMap<String, PendingRequest>, event: Event) {
    let Some(correlation_id) = event.metadata.correlation_id.clone() else {
        return;
    };
    if let Some((_, entry)) = pending.remove(&correlation_id) {
        trace!(
            %correlation_id,
            request_type = %entry.event_type,
            "Settling pending request"
        );
        let _ = entry.sender.send(event);
    } else {
        trace!(%correlation_id, "Dropping reply with no pending request");
    }
}

/// Reconstructs the caller-visible error from a reply's `error` value.
fn remote_error(error: &Value) -> ClientError {
    match (error.get("name"), error.get("message")) {
        (Some(Value::String(name)), Some(Value::String(message))) => ClientError::Remote {
            name: name.clone(),
            message: message.clone(),
        },
        _ => ClientError::RemoteOpaque(error.to_string()),
    }
}

/// Fresh correlation id: unix millis plus 122 random bits, so collisions
/// within a client's lifetime are negligible.
fn new_correlation_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Echo responder: replies on the reply channel with the request's
    /// correlation id, transformed payload and the given type.
    fn spawn_responder(
        transport: Arc<InMemoryTransport>,
        reply_type: &'static str,
        delay: Option<Duration>,
    ) -> JoinHandle<()> {
        let mut requests = transport.subscribe(Channel::Request);
        tokio::spawn(async move {
            while let Ok(request) = requests.recv().await {
                let n = request
                    .payload
                    .as_ref()
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let mut response = Event::new(reply_type).with_payload(json!(n + 1));
                response.metadata.correlation_id = request.metadata.correlation_id.clone();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let _ = transport.publish(Channel::Reply, response).await;
            }
        })
    }

    #[tokio::test]
    async fn test_send_resolves_with_reply() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let responder = spawn_responder(transport.clone(), "RPC_TEST_RESULT", None);
        let client = EventBusClient::connect(transport.clone(), &BusConfig::default());

        let reply = client
            .send(Event::new("RPC_TEST").with_payload(json!(1)))
            .await
            .unwrap();
        assert_eq!(reply.event_type, "RPC_TEST_RESULT");
        assert_eq!(reply.payload, Some(json!(2)));

        client.close().await;
        responder.abort();
    }

    #[tokio::test]
    async fn test_send_times_out_without_reply() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let config = BusConfig::default().with_request_timeout(Duration::from_millis(20));
        let client = EventBusClient::connect(transport.clone(), &config);

        let result = client.send(Event::new("RPC_TEST")).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(client.pending.is_empty());

        client.close().await;
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_dropped() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let responder = spawn_responder(
            transport.clone(),
            "RPC_TEST_RESULT",
            Some(Duration::from_millis(100)),
        );
        let config = BusConfig::default().with_request_timeout(Duration::from_millis(10));
        let client = EventBusClient::connect(transport.clone(), &config);

        let result = client.send(Event::new("RPC_TEST").with_payload(json!(1))).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));

        // The late reply arrives, finds no entry, and is dropped silently.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(client.pending.is_empty());

        client.close().await;
        responder.abort();
    }

    #[tokio::test]
    async fn test_out_of_order_replies_settle_correct_callers() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let client = Arc::new(EventBusClient::connect(
            transport.clone(),
            &BusConfig::default(),
        ));

        // Manual responder that answers in reverse arrival order.
        let mut requests = transport.subscribe(Channel::Request);
        let reverse_transport = transport.clone();
        let responder = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 2 {
                if let Ok(request) = requests.recv().await {
                    seen.push(request);
                }
            }
            for request in seen.into_iter().rev() {
                let n = request.payload.as_ref().and_then(Value::as_i64).unwrap_or(0);
                let mut response = Event::new("RPC_TEST_RESULT").with_payload(json!(n * 10));
                response.metadata.correlation_id = request.metadata.correlation_id.clone();
                let _ = reverse_transport.publish(Channel::Reply, response).await;
            }
        });

        let c1 = client.clone();
        let first =
            tokio::spawn(async move { c1.send(Event::new("RPC_TEST").with_payload(json!(1))).await });
        let c2 = client.clone();
        let second =
            tokio::spawn(async move { c2.send(Event::new("RPC_TEST").with_payload(json!(2))).await });

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.payload, Some(json!(10)));
        assert_eq!(second.payload, Some(json!(20)));

        responder.await.unwrap();
        client.close().await;
    }

    #[tokio::test]
    async fn test_remote_error_reconstruction() {
        assert!(matches!(
            remote_error(&json!({ "name": "TestError_1", "message": "TestErrorMessage_1" })),
            ClientError::Remote { .. }
        ));
        let opaque = remote_error(&json!({ "test": "TestError_2" }));
        match opaque {
            ClientError::RemoteOpaque(message) => {
                assert_eq!(message, r#"{"test":"TestError_2"}"#)
            }
            other => panic!("expected opaque error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_creates_no_pending_entry() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let client = EventBusClient::connect(transport.clone(), &BusConfig::default());
        let mut requests = transport.subscribe(Channel::Request);

        client
            .emit(Event::new("TEST").with_payload(json!(1)))
            .await
            .unwrap();

        let published = requests.recv().await.unwrap();
        assert!(published.metadata.correlation_id.is_none());
        assert!(client.pending.is_empty());

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_rejects_outstanding_requests() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let client = Arc::new(EventBusClient::connect(
            transport.clone(),
            &BusConfig::default(),
        ));

        let inflight = client.clone();
        let outstanding =
            tokio::spawn(async move { inflight.send(Event::new("RPC_TEST")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.close().await;

        let result = outstanding.await.unwrap();
        assert!(matches!(result, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = Arc::new(InMemoryTransport::new(16));
        let client = EventBusClient::connect(transport, &BusConfig::default());
        client.close().await;
        client.close().await;
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let ids: std::collections::HashSet<_> =
            (0..1000).map(|_| new_correlation_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
