//! Connection lifecycle
//!
//! [`RouterCore`] owns the shared state (sessions, registry, route table and
//! admin set) and drives each connection through
//! `Connecting -> AwaitingConfig -> Active -> Closed`. It is transport-free:
//! the serve loop in [`Router`](crate::Router) feeds it frames, and tests can
//! drive it directly with in-memory senders.

use dashmap::DashMap;
use parking_lot::Mutex;
use spacebrew_core::{
    codec, AdminRegistration, ClientConfig, ClientMessage, DataMessage, RouteAction, RouteCommand,
};
use spacebrew_transport::TransportSender;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::admin::AdminBroadcaster;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{Result, RouterError};
use crate::registry::{Client, ClientRegistry, RegistrationKind};
use crate::router::RouterConfig;
use crate::routes::{AddOutcome, Route, RouteTable};
use crate::session::{ConnectionId, Session};

/// Shared router state and per-connection handlers
pub struct RouterCore {
    config: RouterConfig,
    sessions: DashMap<ConnectionId, Arc<Session>>,
    registry: ClientRegistry,
    routes: RouteTable,
    admins: AdminBroadcaster,
    /// Held while client membership and the routes touching it change together,
    /// so no route can be added to a client that is on its way out
    membership: Mutex<()>,
}

impl RouterCore {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            registry: ClientRegistry::new(),
            routes: RouteTable::new(),
            admins: AdminBroadcaster::new(),
            membership: Mutex::new(()),
        }
    }

    /// Accept a transport connection
    pub fn open(&self, sender: Arc<dyn TransportSender>, addr: SocketAddr) -> Result<Arc<Session>> {
        if self.sessions.len() >= self.config.max_connections {
            return Err(RouterError::ConnectionLimit(self.config.max_connections));
        }

        let session = Arc::new(Session::new(sender, addr, self.config.send_interval));
        session.mark_open();
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        debug!("Session {} opened for {}", session.id, addr);
        Ok(session)
    }

    /// Decode and handle one inbound frame. Frames after close are ignored.
    pub fn handle_frame(&self, session: &Arc<Session>, data: &[u8]) -> Result<()> {
        if session.is_closed() {
            return Ok(());
        }
        let message = codec::decode_client(data)?;
        self.handle_message(session, message)
    }

    pub fn handle_message(&self, session: &Arc<Session>, message: ClientMessage) -> Result<()> {
        if session.is_closed() {
            return Ok(());
        }
        match message {
            ClientMessage::Config(config) => self.handle_config(session, &config),
            ClientMessage::Admin(registration) => self.handle_admin(session, registration),
            ClientMessage::Message(data) => self.handle_data(session, &data).map(|_| ()),
            ClientMessage::Route(command) => self.handle_route(session, command),
        }
    }

    fn handle_config(&self, session: &Arc<Session>, config: &ClientConfig) -> Result<()> {
        let registration = {
            let _membership = self.membership.lock();
            let registration =
                self.registry
                    .register(&session.id, &session.remote_address, config)?;

            if let Some(previous) = &registration.displaced {
                info!(
                    "Client {} renamed to {}",
                    previous.key(),
                    registration.client.key()
                );
                self.cascade(previous);
            }
            registration
        };

        session.activate();
        match registration.kind {
            RegistrationKind::New => info!("Client {} registered", registration.client.key()),
            RegistrationKind::Updated => debug!("Client {} updated", registration.client.key()),
        }

        self.admins
            .notify_new_or_updated_client(&registration.client)
    }

    fn handle_admin(&self, session: &Arc<Session>, registration: AdminRegistration) -> Result<()> {
        session.set_admin(Some(registration));

        if !registration.admin {
            self.admins.remove(&session.id);
            return Ok(());
        }

        self.admins.add(Arc::clone(session));
        session.activate();

        if self.config.admin_snapshot {
            self.admins
                .send_snapshot(session, &self.registry, &self.routes)?;
        }
        Ok(())
    }

    fn handle_data(&self, session: &Arc<Session>, message: &DataMessage) -> Result<DispatchReport> {
        let sender = self
            .registry
            .find_by_connection(&session.id)
            .ok_or(RouterError::NotRegistered)?;

        self.dispatcher().dispatch(&sender, message)
    }

    fn handle_route(&self, session: &Arc<Session>, command: RouteCommand) -> Result<()> {
        if !session.is_admin() {
            return Err(RouterError::NotAdmin);
        }

        match command.action {
            RouteAction::Add => {
                let publisher = command.publisher.clone();
                let subscriber = command.subscriber.clone();

                let _membership = self.membership.lock();
                for endpoint in [&publisher, &subscriber] {
                    if self
                        .registry
                        .find(&endpoint.client_name, &endpoint.remote_address)
                        .is_none()
                    {
                        return Err(RouterError::NotFound(format!(
                            "client {} at {}",
                            endpoint.client_name, endpoint.remote_address
                        )));
                    }
                }

                match self.routes.add_route(command.publisher, command.subscriber)? {
                    AddOutcome::Added => {
                        debug!("Route added {} -> {}", publisher, subscriber);
                        let route = Route::new(publisher, subscriber);
                        self.admins.notify_route_change(RouteAction::Add, &route)
                    }
                    AddOutcome::AlreadyExists => Ok(()),
                }
            }
            RouteAction::Remove => {
                let route = self
                    .routes
                    .remove_route(&command.publisher, &command.subscriber)?;
                debug!("Route removed {} -> {}", route.publisher, route.subscriber);
                self.admins.notify_route_change(RouteAction::Remove, &route)
            }
        }
    }

    /// Tear a connection down. Safe to call more than once.
    pub fn close(&self, session: &Arc<Session>) {
        if !session.close() {
            return;
        }
        self.sessions.remove(&session.id);
        self.admins.remove(&session.id);

        let _membership = self.membership.lock();
        if let Some(client) = self.registry.unregister(&session.id) {
            info!("Client {} disconnected", client.key());
            self.cascade(&client);
        }
        debug!("Session {} closed", session.id);
    }

    /// Remove a client's routes and announce its removal. Callers hold `membership`.
    fn cascade(&self, client: &Client) {
        for route in self
            .routes
            .remove_all_involving(&client.name, &client.remote_address)
        {
            if let Err(e) = self.admins.notify_route_change(RouteAction::Remove, &route) {
                debug!("Route removal event not sent: {}", e);
            }
        }
        if let Err(e) = self
            .admins
            .notify_removed_client(&client.name, &client.remote_address)
        {
            debug!("Client removal event not sent: {}", e);
        }
    }

    /// Dispatch as the given client, bypassing the wire
    pub fn dispatch(&self, sender: &Client, message: &DataMessage) -> Result<DispatchReport> {
        self.dispatcher().dispatch(sender, message)
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(&self.registry, &self.routes, &self.sessions, &self.admins)
    }

    pub fn session(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn admins(&self) -> &AdminBroadcaster {
        &self.admins
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}
