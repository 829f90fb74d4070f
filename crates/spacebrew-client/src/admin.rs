//! Admin extension
//!
//! A client built with `admin(true)` registers as an admin tool. The router
//! then pushes every client and route change to it, and [`AdminMirror`] keeps
//! a local copy that route helpers use to resolve channel types.

use parking_lot::RwLock;
use spacebrew_core::{
    AdminEvent, ChannelType, ClientConfig, ClientDescriptor, Endpoint, RouteAction, RouteCommand,
};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Called with a client's announced config
pub type ClientHandler = Arc<dyn Fn(&ClientDescriptor) + Send + Sync>;
/// Called with `(name, remote_address)` of a removed client
pub type RemoveHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Called with a route change
pub type RouteHandler = Arc<dyn Fn(RouteAction, &Endpoint, &Endpoint) + Send + Sync>;

/// `(client name, remote address, channel name)`
pub type ChannelRef<'a> = (&'a str, &'a str, &'a str);

#[derive(Default)]
struct AdminHandlers {
    new_client: RwLock<Option<ClientHandler>>,
    update_client: RwLock<Option<ClientHandler>>,
    remove_client: RwLock<Option<RemoveHandler>>,
    update_route: RwLock<Option<RouteHandler>>,
}

/// Local mirror of the router's clients and routes
#[derive(Default)]
pub struct AdminMirror {
    clients: RwLock<Vec<ClientDescriptor>>,
    routes: RwLock<Vec<(Endpoint, Endpoint)>>,
    /// Our own address as seen by the router, once recognised
    local_address: RwLock<Option<String>>,
    handlers: AdminHandlers,
}

impl AdminMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_new_client<F>(&self, f: F)
    where
        F: Fn(&ClientDescriptor) + Send + Sync + 'static,
    {
        *self.handlers.new_client.write() = Some(Arc::new(f));
    }

    pub fn on_update_client<F>(&self, f: F)
    where
        F: Fn(&ClientDescriptor) + Send + Sync + 'static,
    {
        *self.handlers.update_client.write() = Some(Arc::new(f));
    }

    pub fn on_remove_client<F>(&self, f: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.handlers.remove_client.write() = Some(Arc::new(f));
    }

    pub fn on_update_route<F>(&self, f: F)
    where
        F: Fn(RouteAction, &Endpoint, &Endpoint) + Send + Sync + 'static,
    {
        *self.handlers.update_route.write() = Some(Arc::new(f));
    }

    /// Apply one admin event; `own` is this client's current config
    pub fn handle_event(&self, event: AdminEvent, own: &ClientConfig) {
        match event {
            AdminEvent::Clients(clients) => {
                for client in clients {
                    self.upsert_client(client, own);
                }
            }
            AdminEvent::Removed(removed) => {
                for client in removed {
                    self.clients
                        .write()
                        .retain(|c| !(c.name == client.name && c.remote_address == client.remote_address));
                    let handler = self.handlers.remove_client.read().clone();
                    if let Some(handler) = handler {
                        handler(&client.name, &client.remote_address);
                    }
                }
            }
            AdminEvent::Route(command) => self.apply_route(command),
        }
    }

    fn upsert_client(&self, client: ClientDescriptor, own: &ClientConfig) {
        self.detect_local_address(&client, own);

        let updated = {
            let mut clients = self.clients.write();
            match clients
                .iter_mut()
                .find(|c| c.name == client.name && c.remote_address == client.remote_address)
            {
                Some(existing) => {
                    *existing = client.clone();
                    true
                }
                None => {
                    clients.push(client.clone());
                    false
                }
            }
        };

        let handler = if updated {
            self.handlers.update_client.read().clone()
        } else {
            self.handlers.new_client.read().clone()
        };
        if let Some(handler) = handler {
            handler(&client);
        }
    }

    fn apply_route(&self, command: RouteCommand) {
        {
            let mut routes = self.routes.write();
            let position = routes
                .iter()
                .position(|(p, s)| *p == command.publisher && *s == command.subscriber);
            match (command.action, position) {
                (RouteAction::Add, None) => {
                    routes.push((command.publisher.clone(), command.subscriber.clone()))
                }
                (RouteAction::Remove, Some(index)) => {
                    routes.remove(index);
                }
                _ => {}
            }
        }

        let handler = self.handlers.update_route.read().clone();
        if let Some(handler) = handler {
            handler(command.action, &command.publisher, &command.subscriber);
        }
    }

    /// Our own registration is the one whose name and channel lists match ours
    fn detect_local_address(&self, client: &ClientDescriptor, own: &ClientConfig) {
        if client.name != own.name || self.local_address.read().is_some() {
            return;
        }

        let publish_matches = client.publish.messages.len() == own.publish_channels().len()
            && client
                .publish
                .messages
                .iter()
                .zip(own.publish_channels())
                .all(|(a, b)| a.name == b.name && a.channel_type == b.channel_type);
        let subscribe_matches = client.subscribe.messages.len() == own.subscribe_channels().len()
            && client
                .subscribe
                .messages
                .iter()
                .zip(own.subscribe_channels())
                .all(|(a, b)| a.name == b.name && a.channel_type == b.channel_type);

        if publish_matches && subscribe_matches {
            debug!("Local address recognised as {}", client.remote_address);
            *self.local_address.write() = Some(client.remote_address.clone());
        }
    }

    /// Forget everything; called when the connection drops
    pub fn clear(&self) {
        self.clients.write().clear();
        self.routes.write().clear();
        *self.local_address.write() = None;
    }

    pub fn client(&self, name: &str, remote_address: &str) -> Option<ClientDescriptor> {
        self.clients
            .read()
            .iter()
            .find(|c| c.name == name && c.remote_address == remote_address)
            .cloned()
    }

    pub fn clients(&self) -> Vec<ClientDescriptor> {
        self.clients.read().clone()
    }

    pub fn routes(&self) -> Vec<(Endpoint, Endpoint)> {
        self.routes.read().clone()
    }

    pub fn local_address(&self) -> Option<String> {
        self.local_address.read().clone()
    }

    /// Whether `(name, remote_address)` is this client's own registration
    pub fn is_this_app(&self, own_name: &str, name: &str, remote_address: &str) -> bool {
        own_name == name && self.local_address.read().as_deref() == Some(remote_address)
    }

    pub fn publish_list_by_type(&self, channel_type: &ChannelType) -> Vec<Endpoint> {
        let clients = self.clients.read();
        clients
            .iter()
            .flat_map(|client| {
                client
                    .publish
                    .messages
                    .iter()
                    .filter(|c| c.channel_type == *channel_type)
                    .map(move |c| {
                        Endpoint::new(&client.name, &client.remote_address, &c.name, c.channel_type.clone())
                    })
            })
            .collect()
    }

    pub fn subscribe_list_by_type(&self, channel_type: &ChannelType) -> Vec<Endpoint> {
        let clients = self.clients.read();
        clients
            .iter()
            .flat_map(|client| {
                client
                    .subscribe
                    .messages
                    .iter()
                    .filter(|c| c.channel_type == *channel_type)
                    .map(move |c| {
                        Endpoint::new(&client.name, &client.remote_address, &c.name, c.channel_type.clone())
                    })
            })
            .collect()
    }

    pub fn publish_type(&self, name: &str, remote_address: &str, channel: &str) -> Option<ChannelType> {
        self.client(name, remote_address).and_then(|client| {
            client
                .publish
                .messages
                .into_iter()
                .find(|c| c.name == channel)
                .map(|c| c.channel_type)
        })
    }

    pub fn subscribe_type(&self, name: &str, remote_address: &str, channel: &str) -> Option<ChannelType> {
        self.client(name, remote_address).and_then(|client| {
            client
                .subscribe
                .messages
                .into_iter()
                .find(|c| c.name == channel)
                .map(|c| c.channel_type)
        })
    }

    /// Build route endpoints from names, taking channel types from the mirror
    pub fn resolve_route(
        &self,
        publisher: ChannelRef<'_>,
        subscriber: ChannelRef<'_>,
    ) -> Result<(Endpoint, Endpoint)> {
        let (pub_client, pub_address, pub_channel) = publisher;
        let (sub_client, sub_address, sub_channel) = subscriber;

        let pub_type = self
            .publish_type(pub_client, pub_address, pub_channel)
            .ok_or_else(|| {
                ClientError::UnknownChannel(format!("{}@{}/{}", pub_client, pub_address, pub_channel))
            })?;
        let sub_type = self
            .subscribe_type(sub_client, sub_address, sub_channel)
            .ok_or_else(|| {
                ClientError::UnknownChannel(format!("{}@{}/{}", sub_client, sub_address, sub_channel))
            })?;

        if pub_type != sub_type {
            return Err(ClientError::TypeMismatch {
                publisher: pub_type,
                subscriber: sub_type,
            });
        }

        Ok((
            Endpoint::new(pub_client, pub_address, pub_channel, pub_type),
            Endpoint::new(sub_client, sub_address, sub_channel, sub_type),
        ))
    }
}
