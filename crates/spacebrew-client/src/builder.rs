//! Client options and builder

use spacebrew_core::{
    server_url, DEFAULT_PORT, DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_SEND_INTERVAL_MS,
    DEFAULT_SERVER,
};
use std::time::Duration;

use crate::{Result, Spacebrew};

/// Connection options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    /// Register as an admin tool and mirror clients and routes
    pub admin: bool,
    pub debug: bool,
    /// Retry on a fixed interval after the connection drops
    pub reconnect: bool,
    pub reconnect_interval: Duration,
    /// Minimum interval between data messages
    pub send_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            name: "rust client".to_string(),
            description: "spacebrew rust client".to_string(),
            admin: false,
            debug: false,
            reconnect: true,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
        }
    }
}

impl ClientOptions {
    pub fn url(&self) -> String {
        server_url(&self.server, self.port)
    }

    /// Override options from a `name=..&server=..` style query string.
    ///
    /// Recognised keys are `name`, `description`, `server`, `port` and `debug`.
    /// Empty values are ignored, as are ports that are not numbers.
    pub fn apply_query_string(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "name" => self.name = value.into_owned(),
                "description" => self.description = value.into_owned(),
                "server" => self.server = value.into_owned(),
                "port" => {
                    if let Ok(port) = value.parse() {
                        self.port = port;
                    }
                }
                "debug" => self.debug = value == "true",
                _ => {}
            }
        }
    }
}

/// Builder for a Spacebrew client
#[derive(Debug, Clone, Default)]
pub struct SpacebrewBuilder {
    options: ClientOptions,
}

impl SpacebrewBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set server host
    pub fn server(mut self, server: &str) -> Self {
        self.options.server = server.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Set both host and port from a `ws://host:port` url
    pub fn url(mut self, url: &str) -> Self {
        if let Ok(parsed) = url::Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                self.options.server = host.to_string();
            }
            if let Some(port) = parsed.port() {
                self.options.port = port;
            }
        }
        self
    }

    /// Set client name
    pub fn name(mut self, name: &str) -> Self {
        self.options.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.options.description = description.to_string();
        self
    }

    /// Enable the admin extension
    pub fn admin(mut self, enabled: bool) -> Self {
        self.options.admin = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.options.debug = enabled;
        self
    }

    /// Enable/disable auto-reconnect
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.options.reconnect = enabled;
        self
    }

    /// Set reconnect interval in milliseconds
    pub fn reconnect_interval(mut self, ms: u64) -> Self {
        self.options.reconnect_interval = Duration::from_millis(ms);
        self
    }

    /// Set the send throttle interval in milliseconds
    pub fn send_interval(mut self, ms: u64) -> Self {
        self.options.send_interval = Duration::from_millis(ms);
        self
    }

    /// Apply query string overrides on top of what has been set so far
    pub fn query_string(mut self, query: &str) -> Self {
        self.options.apply_query_string(query);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Build without connecting, so channels can be declared first
    pub fn build(self) -> Spacebrew {
        Spacebrew::new(self.options)
    }

    /// Build and connect
    pub async fn connect(self) -> Result<Spacebrew> {
        let client = self.build();
        client.connect().await?;
        Ok(client)
    }
}
