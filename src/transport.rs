//! # Transport Boundary
//!
//! The bus core does not manage connections, retries or reconnection; it
//! only requires a bidirectional event stream with at-least-once delivery
//! within a connected session. That contract is the [`Transport`] trait.
//!
//! A transport carries two broadcast channels:
//!
//! ```text
//! ┌────────┐  request channel   ┌────────┐
//! │ Client │───────────────────▶│ Server │
//! │        │◀───────────────────│        │
//! └────────┘   reply channel    └────────┘
//! ```
//!
//! Clients publish on the request channel and subscribe to the reply
//! channel; the server does the opposite. Keeping the directions separate
//! means a client never observes its own outbound requests while waiting
//! for replies.
//!
//! [`InMemoryTransport`] is the in-process implementation on Tokio
//! broadcast channels. Remote transports (e.g. a broker client) implement
//! the same trait behind their own connection management.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::config::BusConfig;
use crate::event::Event;

/// Direction of travel on the transport, named from the server's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    /// Client → server: requests and fire-and-forget events.
    Request,
    /// Server → clients: replies and server-published events.
    Reply,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport send failed on {channel} channel: {message}")]
    SendFailed { channel: Channel, message: String },

    #[error("Transport receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("Transport receiver lagged, skipped {count} events")]
    Lagged { count: u64 },

    #[error("Transport channel closed")]
    Closed,
}

/// Bidirectional event stream consumed by the bus server and client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: Channel, event: Event) -> Result<(), TransportError>;

    fn subscribe(&self, channel: Channel) -> EventReceiver;
}

/// Receiving half of a transport subscription.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Receives the next event.
    ///
    /// On lag the receiver resubscribes and reports how many events were
    /// skipped; callers should get back to `recv` promptly to avoid lagging
    /// again.
    pub async fn recv(&mut self) -> Result<Event, TransportError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                self.receiver = self.receiver.resubscribe();
                Err(TransportError::Lagged { count })
            }
            Err(broadcast::error::RecvError::Closed) => Err(TransportError::Closed),
        }
    }

    /// Adapts the receiver into a stream for loop-style consumption.
    pub fn into_stream(self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.receiver)
    }
}

/// In-process transport on Tokio broadcast channels.
///
/// Capacity bounds how many unprocessed events each channel buffers; slow
/// subscribers past that point observe lag, not backpressure.
pub struct InMemoryTransport {
    request_sender: broadcast::Sender<Event>,
    reply_sender: broadcast::Sender<Event>,
    capacity: usize,
    // Keep both channels alive while no external subscriber exists.
    _internal_request_receiver: broadcast::Receiver<Event>,
    _internal_reply_receiver: broadcast::Receiver<Event>,
}

impl InMemoryTransport {
    pub fn new(capacity: usize) -> Self {
        let (request_sender, request_receiver) = broadcast::channel(capacity);
        let (reply_sender, reply_receiver) = broadcast::channel(capacity);
        Self {
            request_sender,
            reply_sender,
            capacity,
            _internal_request_receiver: request_receiver,
            _internal_reply_receiver: reply_receiver,
        }
    }

    /// Builds a transport with buffers sized from the shared bus
    /// configuration, so server and client agree on the capacity.
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.event_buffer_size)
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<Event> {
        match channel {
            Channel::Request => &self.request_sender,
            Channel::Reply => &self.reply_sender,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribers_size(&self, channel: Channel) -> usize {
        self.sender(channel).receiver_count()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, channel: Channel, event: Event) -> Result<(), TransportError> {
        trace!(%channel, event_type = %event.event_type, "Publishing event");
        self.sender(channel)
            .send(event)
            .map_err(|e| TransportError::SendFailed {
                channel,
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn subscribe(&self, channel: Channel) -> EventReceiver {
        EventReceiver::new(self.sender(channel).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_subscribe_round_trip() {
        let transport = InMemoryTransport::new(16);
        let mut rx = transport.subscribe(Channel::Request);

        let event = Event::new("TEST").with_payload(json!(1));
        transport
            .publish(Channel::Request, event.clone())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let transport = InMemoryTransport::new(16);
        let mut request_rx = transport.subscribe(Channel::Request);
        let mut reply_rx = transport.subscribe(Channel::Reply);

        transport
            .publish(Channel::Reply, Event::new("REPLY_ONLY"))
            .await
            .unwrap();

        let reply = reply_rx.recv().await.unwrap();
        assert_eq!(reply.event_type, "REPLY_ONLY");

        // Nothing crossed over onto the request channel.
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), request_rx.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let transport = InMemoryTransport::new(16);
        let mut rx1 = transport.subscribe(Channel::Reply);
        let mut rx2 = transport.subscribe(Channel::Reply);

        transport
            .publish(Channel::Reply, Event::new("FANOUT"))
            .await
            .unwrap();

        assert_eq!(rx1.recv().await.unwrap().event_type, "FANOUT");
        assert_eq!(rx2.recv().await.unwrap().event_type, "FANOUT");
    }

    #[test]
    fn test_from_config_sizes_the_buffers() {
        let config = BusConfig {
            event_buffer_size: 8,
            ..BusConfig::default()
        };
        let transport = InMemoryTransport::from_config(&config);
        assert_eq!(transport.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_subscriptions() {
        let transport = InMemoryTransport::new(16);
        // The internal keep-alive receiver counts as one per channel.
        assert_eq!(transport.subscribers_size(Channel::Request), 1);
        assert_eq!(transport.subscribers_size(Channel::Reply), 1);

        let rx = transport.subscribe(Channel::Request);
        assert_eq!(transport.subscribers_size(Channel::Request), 2);
        assert_eq!(transport.subscribers_size(Channel::Reply), 1);

        drop(rx);
        assert_eq!(transport.subscribers_size(Channel::Request), 1);
    }

    #[tokio::test]
    async fn test_lagged_receiver_resubscribes() {
        let transport = InMemoryTransport::new(2);
        let mut rx = transport.subscribe(Channel::Request);

        for i in 0..8 {
            transport
                .publish(Channel::Request, Event::new(format!("TEST_{}", i)))
                .await
                .unwrap();
        }

        let result = rx.recv().await;
        assert!(matches!(result, Err(TransportError::Lagged { .. })));
    }
}
