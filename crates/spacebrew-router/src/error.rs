//! Router error types
//!
//! None of these are fatal to the router: each one is confined to the message
//! or connection that produced it.

use spacebrew_core::ChannelType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("client '{client}' has no publish channel '{channel}' of type {channel_type}")]
    UnknownChannel {
        client: String,
        channel: String,
        channel_type: ChannelType,
    },

    #[error("type mismatch: publisher is {publisher}, subscriber is {subscriber}")]
    TypeMismatch {
        publisher: ChannelType,
        subscriber: ChannelType,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection has not registered a client")]
    NotRegistered,

    #[error("route commands require an admin connection")]
    NotAdmin,

    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),

    #[error("transport error: {0}")]
    Transport(#[from] spacebrew_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] spacebrew_core::Error),
}

impl RouterError {
    /// Errors that are part of normal fire-and-forget operation
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            RouterError::UnknownChannel { .. } | RouterError::NotFound(_)
        )
    }
}
