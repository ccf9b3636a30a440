//! Crate-level error aggregation. Each subsystem keeps its own error enum;
//! callers composing across subsystems get a single type to `?` through.

use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::context::ContextError;
use crate::effect::EffectError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Effect error: {0}")]
    Effect(#[from] EffectError),
    #[error("Context error: {0}")]
    Context(#[from] ContextError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type BusResult<T> = Result<T, Error>;
