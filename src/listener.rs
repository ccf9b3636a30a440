//! # Messaging Listener
//!
//! A listener is pure configuration: the set of business effects and the
//! middleware chain applied in front of them. No I/O happens until the
//! descriptor is bound to a live transport by [`crate::event_bus::EventBus`].

use crate::effect::{combine_effects, combine_middlewares, Effect, Middleware};

/// Opaque descriptor binding a set of effects behind a middleware chain.
#[derive(Clone, Default)]
pub struct MessagingListener {
    effects: Vec<Effect>,
    middlewares: Vec<Middleware>,
}

impl MessagingListener {
    pub fn builder() -> MessagingListenerBuilder {
        MessagingListenerBuilder::default()
    }

    /// Collapses the configuration into the runnable pipeline: middlewares
    /// composed left-to-right, effects merged into one.
    pub(crate) fn into_pipeline(self) -> (Middleware, Effect) {
        (
            combine_middlewares(self.middlewares),
            combine_effects(self.effects),
        )
    }
}

#[derive(Default)]
pub struct MessagingListenerBuilder {
    effects: Vec<Effect>,
    middlewares: Vec<Middleware>,
}

impl MessagingListenerBuilder {
    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn effects(mut self, effects: Vec<Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn middlewares(mut self, middlewares: Vec<Middleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn build(self) -> MessagingListener {
        MessagingListener {
            effects: self.effects,
            middlewares: self.middlewares,
        }
    }
}
