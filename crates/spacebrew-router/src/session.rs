//! Connection sessions
//!
//! A session is one live transport connection. It owns the outbound side of the
//! connection (transport sender and optional send throttle), the lifecycle state
//! and the admin flags. Client registrations made over the session live in the
//! [`ClientRegistry`](crate::ClientRegistry).

use bytes::Bytes;
use parking_lot::RwLock;
use spacebrew_core::AdminRegistration;
use spacebrew_transport::{SendThrottle, TransportError, TransportSender};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Connection identifier
pub type ConnectionId = String;

/// Per-connection lifecycle
///
/// `Connecting -> AwaitingConfig -> Active -> Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingConfig,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, AwaitingConfig)
                | (AwaitingConfig, Active)
                | (Active, Active)
                | (Connecting, Closed)
                | (AwaitingConfig, Closed)
                | (Active, Closed)
        )
    }
}

/// A connected client session
pub struct Session {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Transport peer address
    pub addr: SocketAddr,
    /// Address used in client identity (IP only)
    pub remote_address: String,
    /// Transport sender for this session
    sender: Arc<dyn TransportSender>,
    /// Lifecycle state
    state: RwLock<ConnectionState>,
    /// Admin registration, if any
    admin: RwLock<Option<AdminRegistration>>,
    /// Data plane rate limiter
    throttle: Option<SendThrottle>,
}

impl Session {
    pub fn new(
        sender: Arc<dyn TransportSender>,
        addr: SocketAddr,
        send_interval: Option<Duration>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            addr,
            remote_address: addr.ip().to_string(),
            sender,
            state: RwLock::new(ConnectionState::Connecting),
            admin: RwLock::new(None),
            throttle: send_interval.map(SendThrottle::new),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Apply a lifecycle transition; invalid transitions are refused
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            debug!(
                "Session {} refused transition {:?} -> {:?}",
                self.id, *state, next
            );
            false
        }
    }

    /// Transport-level open
    pub fn mark_open(&self) -> bool {
        self.transition(ConnectionState::AwaitingConfig)
    }

    /// First (or repeated) successful handshake
    pub fn activate(&self) -> bool {
        self.transition(ConnectionState::Active)
    }

    /// Move to `Closed` and cancel pending sends.
    ///
    /// Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        if !self.transition(ConnectionState::Closed) {
            return false;
        }
        if let Some(throttle) = &self.throttle {
            throttle.cancel();
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn set_admin(&self, registration: Option<AdminRegistration>) {
        *self.admin.write() = registration.filter(|r| r.admin);
    }

    pub fn is_admin(&self) -> bool {
        self.admin.read().is_some()
    }

    /// Admins receive monitor copies of data messages unless they set `no_msgs`
    pub fn wants_messages(&self) -> bool {
        matches!(*self.admin.read(), Some(admin) if !admin.no_msgs)
    }

    /// Queue a control frame (admin events, snapshots) without waiting
    pub fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.sender.try_send(data)
    }

    /// Queue a routed data frame, subject to the send throttle
    pub fn deliver(&self, data: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        match &self.throttle {
            Some(throttle) => throttle.submit(data, &self.sender).map(|_| ()),
            None => self.sender.try_send(data),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.sender.is_connected()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("admin", &self.is_admin())
            .finish()
    }
}
