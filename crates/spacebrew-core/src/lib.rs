//! Spacebrew Core
//!
//! Core types and wire encoding for the Spacebrew publish/subscribe protocol.
//!
//! This crate provides:
//! - Channel and client configuration types ([`ClientConfig`], [`ChannelType`])
//! - Data plane messages ([`DataMessage`], [`Value`])
//! - Route commands and admin events ([`RouteCommand`], [`ServerMessage`])
//! - JSON encoding/decoding of the tagged message variants ([`codec`])

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode_client, decode_server, encode};
pub use error::{Error, Result};
pub use types::*;

/// Default router port
pub const DEFAULT_PORT: u16 = 9000;

/// Default public sandbox server used by client libraries
pub const DEFAULT_SERVER: &str = "sandbox.spacebrew.cc";

/// Default minimum interval between client sends (~60 messages per second)
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 16;

/// Default interval between client reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Build the websocket url for a server/port pair
pub fn server_url(server: &str, port: u16) -> String {
    format!("ws://{}:{}", server, port)
}
