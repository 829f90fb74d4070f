//! Spacebrew Transport Layer
//!
//! This crate provides the transport abstraction used by the router and the
//! client library, plus the WebSocket implementation every Spacebrew client
//! speaks.

pub mod error;
pub mod throttle;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use throttle::{SendThrottle, Submitted};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};
