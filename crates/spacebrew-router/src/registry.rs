//! Connection registry
//!
//! Owns every registered client, keyed by `(name, remoteAddress)`. Each entry
//! remembers the connection that registered it, so a connection closing only
//! removes the entry it still owns.

use parking_lot::RwLock;
use spacebrew_core::{
    ChannelType, ClientConfig, ClientDescriptor, Endpoint, PublishChannel, RemovedClient,
    SubscribeChannel,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RouterError};
use crate::session::ConnectionId;

/// Client identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub name: String,
    pub remote_address: String,
}

impl ClientKey {
    pub fn new(name: &str, remote_address: &str) -> Self {
        Self {
            name: name.to_string(),
            remote_address: remote_address.to_string(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.remote_address)
    }
}

/// Channel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publish,
    Subscribe,
}

/// A registered client
#[derive(Debug, Clone)]
pub struct Client {
    pub name: String,
    pub remote_address: String,
    pub description: String,
    pub publish: Vec<PublishChannel>,
    pub subscribe: Vec<SubscribeChannel>,
    /// Connection that owns this registration
    pub connection: ConnectionId,
    /// Position in registration order; kept across updates
    order: u64,
}

impl Client {
    pub fn key(&self) -> ClientKey {
        ClientKey::new(&self.name, &self.remote_address)
    }

    pub fn publish_channel(&self, name: &str) -> Option<&PublishChannel> {
        self.publish.iter().find(|c| c.name == name)
    }

    pub fn subscribe_channel(&self, name: &str) -> Option<&SubscribeChannel> {
        self.subscribe.iter().find(|c| c.name == name)
    }

    /// Config as broadcast to admins
    pub fn descriptor(&self) -> ClientDescriptor {
        ClientDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            remote_address: self.remote_address.clone(),
            publish: self.publish.clone().into(),
            subscribe: self.subscribe.clone().into(),
        }
    }

    pub fn removed(&self) -> RemovedClient {
        RemovedClient {
            name: self.name.clone(),
            remote_address: self.remote_address.clone(),
        }
    }

    fn endpoints(&self, direction: Direction) -> Vec<Endpoint> {
        let channels: Vec<(&str, &ChannelType)> = match direction {
            Direction::Publish => self
                .publish
                .iter()
                .map(|c| (c.name.as_str(), &c.channel_type))
                .collect(),
            Direction::Subscribe => self
                .subscribe
                .iter()
                .map(|c| (c.name.as_str(), &c.channel_type))
                .collect(),
        };

        channels
            .into_iter()
            .map(|(name, channel_type)| {
                Endpoint::new(&self.name, &self.remote_address, name, channel_type.clone())
            })
            .collect()
    }
}

/// Whether a registration created or replaced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    New,
    Updated,
}

/// Result of a successful register call
#[derive(Debug, Clone)]
pub struct Registration {
    pub client: Arc<Client>,
    pub kind: RegistrationKind,
    /// Entry this connection held under a previous name, now removed
    pub displaced: Option<Arc<Client>>,
}

#[derive(Default)]
struct RegistryInner {
    clients: HashMap<ClientKey, Arc<Client>>,
    by_connection: HashMap<ConnectionId, ClientKey>,
    next_order: u64,
}

/// Registry of live clients
#[derive(Default)]
pub struct ClientRegistry {
    inner: RwLock<RegistryInner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the client declared by `config` on `connection`.
    ///
    /// Channel lists are replaced, never merged.
    pub fn register(
        &self,
        connection: &ConnectionId,
        remote_address: &str,
        config: &ClientConfig,
    ) -> Result<Registration> {
        config
            .validate()
            .map_err(|e| RouterError::InvalidConfig(e.to_string()))?;

        let key = ClientKey::new(&config.name, remote_address);
        let mut inner = self.inner.write();

        // A connection that renames itself gives up its old entry
        let displaced = match inner.by_connection.get(connection) {
            Some(previous) if *previous != key => {
                let previous = previous.clone();
                match inner.clients.get(&previous) {
                    Some(client) if client.connection == *connection => {
                        inner.clients.remove(&previous)
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        let existing = inner.clients.get(&key).cloned();
        let order = match &existing {
            Some(client) => client.order,
            None => {
                inner.next_order += 1;
                inner.next_order
            }
        };

        // Another connection declaring the same identity takes the entry over
        if let Some(client) = &existing {
            if client.connection != *connection {
                inner.by_connection.remove(&client.connection);
            }
        }

        let client = Arc::new(Client {
            name: config.name.clone(),
            remote_address: remote_address.to_string(),
            description: config.description.clone(),
            publish: config.publish_channels().to_vec(),
            subscribe: config.subscribe_channels().to_vec(),
            connection: connection.clone(),
            order,
        });

        inner.clients.insert(key.clone(), Arc::clone(&client));
        inner.by_connection.insert(connection.clone(), key);

        let kind = if existing.is_some() {
            RegistrationKind::Updated
        } else {
            RegistrationKind::New
        };

        Ok(Registration {
            client,
            kind,
            displaced,
        })
    }

    pub fn find(&self, name: &str, remote_address: &str) -> Option<Arc<Client>> {
        self.inner
            .read()
            .clients
            .get(&ClientKey::new(name, remote_address))
            .cloned()
    }

    pub fn find_by_connection(&self, connection: &ConnectionId) -> Option<Arc<Client>> {
        let inner = self.inner.read();
        inner
            .by_connection
            .get(connection)
            .and_then(|key| inner.clients.get(key))
            .cloned()
    }

    /// Remove the client owned by `connection`, if any
    pub fn unregister(&self, connection: &ConnectionId) -> Option<Arc<Client>> {
        let mut inner = self.inner.write();
        let key = inner.by_connection.remove(connection)?;
        match inner.clients.get(&key) {
            Some(client) if client.connection == *connection => inner.clients.remove(&key),
            _ => None,
        }
    }

    /// All clients in registration order
    pub fn list(&self) -> Vec<Arc<Client>> {
        let mut clients: Vec<Arc<Client>> = self.inner.read().clients.values().cloned().collect();
        clients.sort_by_key(|c| c.order);
        clients
    }

    /// Every routable endpoint of the given direction and type, in registration order
    pub fn list_by_channel_type(&self, direction: Direction, channel_type: &ChannelType) -> Vec<Endpoint> {
        self.list()
            .iter()
            .flat_map(|client| client.endpoints(direction))
            .filter(|endpoint| endpoint.channel_type == *channel_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().clients.is_empty()
    }
}
