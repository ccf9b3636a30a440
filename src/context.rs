//! # Dependency Context
//!
//! An explicit dependency-injection context built once at startup and passed
//! by handle into the bus server and effects. There is no process-wide
//! registry: every binding lives in the `Context` instance it was bound to,
//! which keeps tests free to swap bindings per test.
//!
//! Bindings are registered eagerly through [`ContextBuilder::bind_eagerly_to`]:
//! each factory runs at bind time and may look up bindings registered before
//! it. Binding order across unrelated tokens does not matter — a factory only
//! needs its own dependencies bound first. All bindings are singletons.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Typed lookup key for a context binding.
///
/// The string key identifies the binding; the type parameter pins the
/// instance type at the lookup site.
pub struct Token<T: ?Sized> {
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> Token<T> {
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("No binding registered for token: {0}")]
    NotBound(String),
    #[error("Binding for token {0} has a different type than requested")]
    TypeMismatch(String),
}

/// Read-only capability lookup shared by the bus server, client and effects.
#[derive(Clone, Default)]
pub struct Context {
    bindings: Arc<DashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder {
            context: Context::default(),
        }
    }

    /// Resolves the singleton bound to `token`.
    pub fn lookup<T: Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Result<Arc<T>, ContextError> {
        let entry = self
            .bindings
            .get(token.key)
            .ok_or_else(|| ContextError::NotBound(token.key.to_string()))?;
        entry
            .value()
            .clone()
            .downcast::<T>()
            .map_err(|_| ContextError::TypeMismatch(token.key.to_string()))
    }
}

/// Builds a [`Context`] by running binding factories eagerly, in bind order.
pub struct ContextBuilder {
    context: Context,
}

impl ContextBuilder {
    /// Binds `token` to the instance produced by `factory`.
    ///
    /// The factory runs immediately and sees every binding registered before
    /// this call, so dependent components can resolve their collaborators at
    /// bind time.
    pub fn bind_eagerly_to<T, F>(self, token: &Token<T>, factory: F) -> Result<Self, ContextError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Context) -> Result<Arc<T>, ContextError>,
    {
        let instance = factory(&self.context)?;
        self.context.bindings.insert(token.key(), instance);
        Ok(self)
    }

    pub fn build(self) -> Context {
        self.context
    }
}
