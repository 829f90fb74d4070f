//! Admin notification broadcaster
//!
//! Admin connections see every change to the registry and the route table.
//! Events are encoded once and queued on each admin's outbound channel without
//! waiting; an admin whose queue is full or closed misses that event and the
//! others still get it.

use bytes::Bytes;
use dashmap::DashMap;
use spacebrew_core::{codec, AdminEvent, DataMessage, RemovedClient, RouteAction, ServerMessage};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::Result;
use crate::registry::{Client, ClientRegistry};
use crate::routes::{Route, RouteTable};
use crate::session::{ConnectionId, Session};

/// Set of admin connections
#[derive(Default)]
pub struct AdminBroadcaster {
    admins: DashMap<ConnectionId, Arc<Session>>,
}

impl AdminBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<Session>) {
        debug!("Admin {} registered", session.id);
        self.admins.insert(session.id.clone(), session);
    }

    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.admins.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.admins.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }

    /// Announce a new or updated client
    pub fn notify_new_or_updated_client(&self, client: &Client) -> Result<()> {
        self.notify_clients(&[client])
    }

    /// Announce several clients in one batched event
    pub fn notify_clients(&self, clients: &[&Client]) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let descriptors = clients.iter().map(|c| c.descriptor()).collect();
        self.broadcast(&ServerMessage::Admin(AdminEvent::Clients(descriptors)))
    }

    pub fn notify_removed_client(&self, name: &str, remote_address: &str) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let removed = RemovedClient {
            name: name.to_string(),
            remote_address: remote_address.to_string(),
        };
        self.broadcast(&ServerMessage::Admin(AdminEvent::Removed(vec![removed])))
    }

    pub fn notify_route_change(&self, action: RouteAction, route: &Route) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.broadcast(&ServerMessage::Admin(AdminEvent::Route(
            route.to_command(action),
        )))
    }

    /// Copy a data message to admins that did not opt out with `no_msgs`
    pub fn monitor(&self, sender: &Client, message: &DataMessage) -> Result<usize> {
        if !self.admins.iter().any(|admin| admin.wants_messages()) {
            return Ok(0);
        }

        let mut copy = message.clone();
        copy.client_name = Some(sender.name.clone());
        copy.remote_address = Some(sender.remote_address.clone());
        let frame = codec::encode(&ServerMessage::Data(copy))?;

        Ok(self.send_where(&frame, |admin| admin.wants_messages()))
    }

    /// Bring a newly registered admin up to date: one batch of every known client,
    /// then one route add per existing route
    pub fn send_snapshot(
        &self,
        session: &Session,
        registry: &ClientRegistry,
        routes: &RouteTable,
    ) -> Result<()> {
        let clients = registry.list();
        if !clients.is_empty() {
            let descriptors = clients.iter().map(|c| c.descriptor()).collect();
            let frame = codec::encode(&ServerMessage::Admin(AdminEvent::Clients(descriptors)))?;
            if let Err(e) = session.send(frame) {
                debug!("Snapshot to admin {} dropped: {}", session.id, e);
                return Ok(());
            }
        }

        for route in routes.all() {
            let frame = codec::encode(&ServerMessage::Admin(AdminEvent::Route(
                route.to_command(RouteAction::Add),
            )))?;
            if let Err(e) = session.send(frame) {
                debug!("Snapshot to admin {} dropped: {}", session.id, e);
                break;
            }
        }
        Ok(())
    }

    fn broadcast(&self, message: &ServerMessage) -> Result<()> {
        let frame = codec::encode(message)?;
        self.send_where(&frame, |_| true);
        Ok(())
    }

    fn send_where(&self, frame: &Bytes, filter: impl Fn(&Session) -> bool) -> usize {
        let mut sent = 0;
        for admin in self.admins.iter() {
            if !filter(admin.value().as_ref()) {
                continue;
            }
            match admin.send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => trace!("Admin event to {} dropped: {}", admin.key(), e),
            }
        }
        sent
    }
}
