//! Router serve loop
//!
//! The router is transport-agnostic: it accepts connections from any
//! `TransportServer` and hands every inbound frame to the [`RouterCore`].
//!
//! # Example
//!
//! ```no_run
//! use spacebrew_router::{Router, RouterConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::new(RouterConfig::default());
//! router.serve_websocket("0.0.0.0:9000").await?;
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use spacebrew_transport::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(feature = "websocket")]
use spacebrew_transport::{WebSocketConfig, WebSocketServer};

use crate::error::Result;
use crate::lifecycle::RouterCore;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Server name
    pub name: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Bounded outbound queue per connection
    pub outbound_capacity: usize,
    /// Largest accepted inbound frame
    pub max_message_size: usize,
    /// Minimum interval between data frames to one connection; `None` disables throttling
    pub send_interval: Option<Duration>,
    /// Send the current clients and routes to newly registered admins
    pub admin_snapshot: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "Spacebrew Router".to_string(),
            max_connections: 1024,
            outbound_capacity: 100,
            max_message_size: 64 * 1024,
            send_interval: None,
            admin_snapshot: true,
        }
    }
}

/// Spacebrew router
pub struct Router {
    core: Arc<RouterCore>,
    /// Running flag
    running: Arc<RwLock<bool>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            core: Arc::new(RouterCore::new(config)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Serve using any TransportServer implementation.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        info!("{} accepting connections", self.core.config().name);
        *self.running.write() = true;

        while *self.running.read() {
            match server.accept().await {
                Ok((sender, receiver, addr)) => {
                    info!("New connection from {}", addr);
                    self.handle_connection(Arc::new(sender), receiver, addr);
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }

        server.close().await?;
        Ok(())
    }

    /// Start the router on WebSocket.
    ///
    /// Default port: 9000
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let config = self.core.config();
        let server = WebSocketServer::bind(addr).await?.with_config(WebSocketConfig {
            max_message_size: config.max_message_size,
            outbound_capacity: config.outbound_capacity,
            ..Default::default()
        });
        self.serve_on(server).await
    }

    /// Alias for `serve_websocket`.
    #[cfg(feature = "websocket")]
    pub async fn serve(&self, addr: &str) -> Result<()> {
        self.serve_websocket(addr).await
    }

    /// Handle a new connection
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let session = match core.open(Arc::clone(&sender), addr) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Rejecting {}: {}", addr, e);
                    let _ = sender.close().await;
                    return;
                }
            };

            while *running.read() {
                match receiver.recv().await {
                    Some(TransportEvent::Data(data)) => {
                        if let Err(e) = core.handle_frame(&session, &data) {
                            if e.is_expected() {
                                debug!("Ignored message from {}: {}", addr, e);
                            } else {
                                warn!("Rejected message from {}: {}", addr, e);
                            }
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        info!("Client {} disconnected: {:?}", addr, reason);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        error!("Transport error from {}: {}", addr, e);
                        break;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break,
                }
            }

            core.close(&session);
            let _ = sender.close().await;
        });
    }

    /// Stop accepting connections
    pub fn stop(&self) {
        *self.running.write() = false;
    }

    /// Registered clients
    pub fn client_count(&self) -> usize {
        self.core.registry().len()
    }

    pub fn route_count(&self) -> usize {
        self.core.routes().len()
    }

    /// Open transport connections, registered or not
    pub fn session_count(&self) -> usize {
        self.core.session_count()
    }

    pub fn core(&self) -> Arc<RouterCore> {
        Arc::clone(&self.core)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
