//! Route table
//!
//! Routes are directed edges from one publish channel to one subscribe channel.
//! They are indexed by publisher tuple so dispatch resolves all routes leaving a
//! channel with a single hash lookup. Endpoints are plain identities, never
//! references into the registry. [`RouterCore`](crate::RouterCore) only adds a
//! route while both endpoint clients are registered and removes it in the same
//! step that unregisters either of them.

use parking_lot::RwLock;
use spacebrew_core::{Endpoint, RouteAction, RouteCommand};
use std::collections::HashMap;

use crate::error::{Result, RouterError};

/// A directed publisher -> subscriber link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub publisher: Endpoint,
    pub subscriber: Endpoint,
}

impl Route {
    pub fn new(publisher: Endpoint, subscriber: Endpoint) -> Self {
        Self {
            publisher,
            subscriber,
        }
    }

    /// Whether either end belongs to the given client
    pub fn involves(&self, client_name: &str, remote_address: &str) -> bool {
        let matches = |e: &Endpoint| e.client_name == client_name && e.remote_address == remote_address;
        matches(&self.publisher) || matches(&self.subscriber)
    }

    pub fn to_command(&self, action: RouteAction) -> RouteCommand {
        RouteCommand {
            action,
            publisher: self.publisher.clone(),
            subscriber: self.subscriber.clone(),
        }
    }
}

/// Outcome of an add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// Identical route already present; nothing changed
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PublisherKey {
    client_name: String,
    remote_address: String,
    channel: String,
}

impl PublisherKey {
    fn new(client_name: &str, remote_address: &str, channel: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            remote_address: remote_address.to_string(),
            channel: channel.to_string(),
        }
    }

    fn of(endpoint: &Endpoint) -> Self {
        Self::new(&endpoint.client_name, &endpoint.remote_address, &endpoint.name)
    }
}

#[derive(Default)]
struct TableInner {
    by_publisher: HashMap<PublisherKey, Vec<Route>>,
    len: usize,
}

/// Route storage
#[derive(Default)]
pub struct RouteTable {
    inner: RwLock<TableInner>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route; both endpoints must carry the same channel type
    pub fn add_route(&self, publisher: Endpoint, subscriber: Endpoint) -> Result<AddOutcome> {
        if publisher.channel_type != subscriber.channel_type {
            return Err(RouterError::TypeMismatch {
                publisher: publisher.channel_type,
                subscriber: subscriber.channel_type,
            });
        }

        let route = Route::new(publisher, subscriber);
        let mut inner = self.inner.write();
        let routes = inner
            .by_publisher
            .entry(PublisherKey::of(&route.publisher))
            .or_default();

        if routes.contains(&route) {
            return Ok(AddOutcome::AlreadyExists);
        }
        routes.push(route);
        inner.len += 1;
        Ok(AddOutcome::Added)
    }

    /// Remove the first route matching both endpoints exactly
    pub fn remove_route(&self, publisher: &Endpoint, subscriber: &Endpoint) -> Result<Route> {
        let key = PublisherKey::of(publisher);
        let mut inner = self.inner.write();

        let routes = inner
            .by_publisher
            .get_mut(&key)
            .ok_or_else(|| RouterError::NotFound(format!("route {} -> {}", publisher, subscriber)))?;
        let index = routes
            .iter()
            .position(|r| r.publisher == *publisher && r.subscriber == *subscriber)
            .ok_or_else(|| RouterError::NotFound(format!("route {} -> {}", publisher, subscriber)))?;

        let removed = routes.remove(index);
        if routes.is_empty() {
            inner.by_publisher.remove(&key);
        }
        inner.len -= 1;
        Ok(removed)
    }

    /// Routes leaving one publish channel
    pub fn routes_from(&self, client_name: &str, remote_address: &str, channel: &str) -> Vec<Route> {
        self.inner
            .read()
            .by_publisher
            .get(&PublisherKey::new(client_name, remote_address, channel))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every route touching the client; returns what was removed
    pub fn remove_all_involving(&self, client_name: &str, remote_address: &str) -> Vec<Route> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();

        inner.by_publisher.retain(|_, routes| {
            routes.retain(|route| {
                if route.involves(client_name, remote_address) {
                    removed.push(route.clone());
                    false
                } else {
                    true
                }
            });
            !routes.is_empty()
        });

        inner.len -= removed.len();
        removed
    }

    pub fn all(&self) -> Vec<Route> {
        self.inner
            .read()
            .by_publisher
            .values()
            .flat_map(|routes| routes.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btn() -> Endpoint {
        Endpoint::new("button", "10.0.0.2", "btn", "boolean")
    }

    fn lamp() -> Endpoint {
        Endpoint::new("lamp", "10.0.0.3", "light", "boolean")
    }

    #[test]
    fn test_add_and_lookup() {
        let table = RouteTable::new();
        assert_eq!(table.add_route(btn(), lamp()).unwrap(), AddOutcome::Added);

        let routes = table.routes_from("button", "10.0.0.2", "btn");
        assert_eq!(routes, vec![Route::new(btn(), lamp())]);
        assert!(table.routes_from("button", "10.0.0.9", "btn").is_empty());
    }

    #[test]
    fn test_type_mismatch_leaves_table_unchanged() {
        let table = RouteTable::new();
        let before = table.routes_from("button", "10.0.0.2", "btn");

        let level = Endpoint::new("dimmer", "10.0.0.4", "level", "range");
        let result = table.add_route(btn(), level);

        assert!(matches!(result, Err(RouterError::TypeMismatch { .. })));
        assert_eq!(table.routes_from("button", "10.0.0.2", "btn"), before);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_add_keeps_one_entry() {
        let table = RouteTable::new();
        table.add_route(btn(), lamp()).unwrap();
        assert_eq!(
            table.add_route(btn(), lamp()).unwrap(),
            AddOutcome::AlreadyExists
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_missing_route() {
        let table = RouteTable::new();
        table.add_route(btn(), lamp()).unwrap();

        let other = Endpoint::new("lamp", "10.0.0.3", "other", "boolean");
        assert!(matches!(
            table.remove_route(&btn(), &other),
            Err(RouterError::NotFound(_))
        ));
        assert_eq!(table.len(), 1);

        table.remove_route(&btn(), &lamp()).unwrap();
        assert!(table.is_empty());
        assert!(table.remove_route(&btn(), &lamp()).is_err());
    }

    #[test]
    fn test_remove_all_involving_both_directions() {
        let table = RouteTable::new();
        let lamp_out = Endpoint::new("lamp", "10.0.0.3", "status", "boolean");
        let other = Endpoint::new("other", "10.0.0.5", "in", "boolean");

        table.add_route(btn(), lamp()).unwrap();
        table.add_route(lamp_out, other.clone()).unwrap();
        table.add_route(btn(), other).unwrap();

        let removed = table.remove_all_involving("lamp", "10.0.0.3");
        assert_eq!(removed.len(), 2);
        assert!(table.routes_from("lamp", "10.0.0.3", "status").is_empty());
        assert_eq!(table.routes_from("button", "10.0.0.2", "btn").len(), 1);
        assert_eq!(table.len(), 1);
    }
}
