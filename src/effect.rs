//! # Effect Composition Runtime
//!
//! Effects are composable handlers that transform inbound events into
//! outbound events. They are pure data-flow descriptions: an effect owns no
//! transport resources and is only wired to I/O when a listener is bound to
//! a live transport by the bus server.
//!
//! ## Combinators
//!
//! - [`match_event`]: lets through only events whose type equals the given
//!   literal, then hands off to [`EffectBuilder::act`]
//! - [`EffectBuilder::act`]: the fault-isolation boundary around a
//!   projection function
//! - [`combine_effects`]: offers every event to all effects concurrently and
//!   merges their outputs
//! - [`combine_middlewares`]: sequential left-to-right composition applied
//!   to the input stream before business effects
//!
//! ## Fault Isolation
//!
//! A failing projection produces an error reply for its own event and
//! nothing else. One client's bad payload must never stop the pipeline from
//! answering any other client's concurrent requests — this is the critical
//! invariant of the runtime, and the error conversion here is what upholds
//! it.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::context::Context;
use crate::event::Event;
use crate::reply::reply;

/// Error raised by a projection function inside [`EffectBuilder::act`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    /// Domain error with an explicit name, carried to the requester verbatim.
    #[error("{name}: {message}")]
    Named { name: String, message: String },
    /// Inbound payload failed a schema check.
    #[error("Payload validation failed: {0}")]
    Validation(String),
    /// Handler failure without a dedicated name.
    #[error("{0}")]
    Handler(String),
}

impl EffectError {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Error name carried on the wire in `error.name`.
    pub fn name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::Validation(_) => "ValidationError",
            Self::Handler(_) => "Error",
        }
    }

    /// Error message carried on the wire in `error.message`.
    pub fn message(&self) -> String {
        match self {
            Self::Named { message, .. } => message.clone(),
            Self::Validation(message) => message.clone(),
            Self::Handler(message) => message.clone(),
        }
    }
}

/// Output of one projection turn: the events to publish, or the error for
/// this single event.
pub type EffectOutput = Result<Vec<Event>, EffectError>;

type HandlerFn = Arc<dyn Fn(Event, Context) -> BoxFuture<'static, Vec<Event>> + Send + Sync>;
type ApplyFn = Arc<dyn Fn(Event, Context) -> BoxFuture<'static, EffectOutput> + Send + Sync>;
type ErrorMapFn = Arc<dyn Fn(&EffectError, &Event) -> Value + Send + Sync>;

/// A named transformation from inbound events to outbound events.
///
/// `handle` is total: every failure of the wrapped projection has already
/// been converted into an error reply, so the caller never observes an
/// error for somebody else's event.
#[derive(Clone)]
pub struct Effect {
    handler: HandlerFn,
}

impl Effect {
    pub async fn handle(&self, event: Event, context: Context) -> Vec<Event> {
        (self.handler)(event, context).await
    }
}

/// Starts an effect definition with a type filter.
///
/// Only events whose type equals `event_type` reach the projection; all
/// others produce no output from this effect. Matching is exact string
/// equality, no payload validation happens here.
pub fn match_event(event_type: impl Into<String>) -> EffectBuilder {
    EffectBuilder {
        event_type: event_type.into(),
    }
}

pub struct EffectBuilder {
    event_type: String,
}

impl EffectBuilder {
    /// Wraps `project` in the fault-isolation boundary.
    ///
    /// When `project` fails, the failure is converted into an automatic
    /// error reply carrying `error.name` / `error.message` and the source
    /// event's correlation id, and the pipeline moves on.
    pub fn act<F, Fut>(self, project: F) -> Effect
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EffectOutput> + Send + 'static,
    {
        self.build(project, None)
    }

    /// Like [`act`](Self::act), with an explicit error-to-event mapping.
    ///
    /// On failure, `error_map` produces the raw wire value of the sole
    /// output for that event. The value is re-checked against the event
    /// shape (it must carry a non-empty string `type`); a value failing
    /// that check is replaced by a generic error reply whose message is
    /// the canonical JSON text of the invalid value.
    pub fn act_with_error_map<F, Fut, M>(self, project: F, error_map: M) -> Effect
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EffectOutput> + Send + 'static,
        M: Fn(&EffectError, &Event) -> Value + Send + Sync + 'static,
    {
        self.build(project, Some(Arc::new(error_map)))
    }

    fn build<F, Fut>(self, project: F, error_map: Option<ErrorMapFn>) -> Effect
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EffectOutput> + Send + 'static,
    {
        let event_type = self.event_type;
        let project = Arc::new(project);
        Effect {
            handler: Arc::new(move |event: Event, context: Context| {
                if !event.matches(&event_type) {
                    return futures::future::ready(Vec::new()).boxed();
                }
                let project = project.clone();
                let error_map = error_map.clone();
                async move {
                    match project(event.clone(), context).await {
                        Ok(outputs) => outputs,
                        Err(error) => match error_map {
                            Some(map) => mapped_error_reply(&map, &error, &event),
                            None => {
                                warn!(
                                    event_type = %event.event_type,
                                    %error,
                                    "Effect failed, forwarding error reply"
                                );
                                vec![error_reply(&event, &error)]
                            }
                        },
                    }
                }
                .boxed()
            }),
        }
    }
}

/// Automatic error-to-reply conversion for unmapped projection failures.
pub(crate) fn error_reply(source: &Event, error: &EffectError) -> Event {
    reply(
        source,
        Event::new(source.event_type.clone()).with_error(json!({
            "name": error.name(),
            "message": error.message(),
        })),
    )
}

fn mapped_error_reply(map: &ErrorMapFn, error: &EffectError, source: &Event) -> Vec<Event> {
    let value = map(error, source);
    if Event::is_event_value(&value) {
        if let Ok(event) = serde_json::from_value::<Event>(value.clone()) {
            return vec![event];
        }
    }
    // The mapping produced something that is not an event. Still answer the
    // requester instead of killing the pipeline.
    warn!(
        event_type = %source.event_type,
        "Error mapping returned an invalid event, replacing with generic error reply"
    );
    vec![reply(
        source,
        Event::new(source.event_type.clone()).with_error(json!({
            "name": "EventError",
            "message": value.to_string(),
        })),
    )]
}

/// Merges effects into one: every input event is offered to all of them
/// concurrently and their outputs are merged.
///
/// Ordering is preserved within a single effect's handling of a single
/// event and unspecified across distinct effects.
pub fn combine_effects(effects: Vec<Effect>) -> Effect {
    Effect {
        handler: Arc::new(move |event: Event, context: Context| {
            let pending: Vec<_> = effects
                .iter()
                .map(|effect| {
                    let effect = effect.clone();
                    let event = event.clone();
                    let context = context.clone();
                    async move { effect.handle(event, context).await }
                })
                .collect();
            async move {
                join_all(pending)
                    .await
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
            }
            .boxed()
        }),
    }
}

/// An effect-shaped transformation applied to the input stream before the
/// business effects, typically for validation or cross-cutting concerns.
///
/// Unlike [`Effect::handle`], `apply` is fallible: the bus server converts a
/// middleware failure into an error reply for the offending event.
#[derive(Clone)]
pub struct Middleware {
    apply: ApplyFn,
}

impl Middleware {
    pub async fn apply(&self, event: Event, context: Context) -> EffectOutput {
        (self.apply)(event, context).await
    }
}

/// Lifts an async function into a [`Middleware`].
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EffectOutput> + Send + 'static,
{
    Middleware {
        apply: Arc::new(move |event, context| f(event, context).boxed()),
    }
}

/// Sequential composition: input passes through each middleware in order
/// before reaching the merged business effects.
///
/// Each output event of stage `n` is fed to stage `n + 1`. An empty list
/// composes to the identity.
pub fn combine_middlewares(middlewares: Vec<Middleware>) -> Middleware {
    Middleware {
        apply: Arc::new(move |event: Event, context: Context| {
            let middlewares = middlewares.clone();
            async move {
                let mut current = vec![event];
                for stage in &middlewares {
                    let mut next = Vec::new();
                    for event in current {
                        next.extend(stage.apply(event, context.clone()).await?);
                    }
                    current = next;
                }
                Ok(current)
            }
            .boxed()
        }),
    }
}
