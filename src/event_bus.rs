//! # Bus Server
//!
//! Binds a [`MessagingListener`] to a live transport and runs the dispatch
//! loop:
//!
//! ```text
//! request channel ──▶ middlewares ──▶ combined effects ──▶ reply channel
//! ```
//!
//! Every inbound event is dispatched on its own task, so effects handling
//! different events never share a failure domain. Middleware failures are
//! converted to error replies for the offending event; everything an effect
//! produces is republished on the reply channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::context::Context;
use crate::effect::{error_reply, Effect, Middleware};
use crate::event::Event;
use crate::listener::MessagingListener;
use crate::transport::{Channel, Transport};

/// Read-only view of the effective server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBusConfig {
    pub timeout: Option<Duration>,
}

/// A listener bound to a live transport.
///
/// Owns the transport subscription and the combined effect pipeline for its
/// lifetime; nothing else mutates them.
pub struct EventBus {
    config: EventBusConfig,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Subscribes to the transport's request channel and starts dispatching
    /// inbound events through the listener's pipeline.
    pub fn bind(
        listener: MessagingListener,
        transport: Arc<dyn Transport>,
        context: Context,
        config: &BusConfig,
    ) -> Self {
        let (middlewares, effects) = listener.into_pipeline();
        let receiver = transport.subscribe(Channel::Request);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let dispatch_handle = tokio::spawn(async move {
            let mut stream = receiver.into_stream();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            debug!(event_type = %event.event_type, "Dispatching inbound event");
                            let middlewares = middlewares.clone();
                            let effects = effects.clone();
                            let transport = transport.clone();
                            let context = context.clone();
                            tokio::spawn(async move {
                                dispatch_one(event, middlewares, effects, transport, context)
                                    .await;
                            });
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(count))) => {
                            warn!(count, "Dispatch loop lagged, inbound events skipped");
                        }
                        None => break,
                    }
                }
            }
        });

        Self {
            config: EventBusConfig {
                timeout: config.request_timeout,
            },
            shutdown: Mutex::new(Some(shutdown_tx)),
            dispatch_handle: Mutex::new(Some(dispatch_handle)),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Unsubscribes from the transport and waits for the dispatch loop to
    /// stop. Safe to call more than once.
    pub async fn close(&self) {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Runs one inbound event through the pipeline and republishes the output.
async fn dispatch_one(
    event: Event,
    middlewares: Middleware,
    effects: Effect,
    transport: Arc<dyn Transport>,
    context: Context,
) {
    let inputs = match middlewares.apply(event.clone(), context.clone()).await {
        Ok(inputs) => inputs,
        Err(error) => {
            warn!(event_type = %event.event_type, %error, "Middleware rejected event");
            publish_output(&transport, error_reply(&event, &error)).await;
            return;
        }
    };

    for input in inputs {
        for output in effects.handle(input, context.clone()).await {
            publish_output(&transport, output).await;
        }
    }
}

async fn publish_output(transport: &Arc<dyn Transport>, output: Event) {
    if let Err(error) = transport.publish(Channel::Reply, output).await {
        warn!(%error, "Failed to republish effect output");
    }
}
