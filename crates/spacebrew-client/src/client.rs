//! Main Spacebrew client implementation

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use spacebrew_core::{
    codec, AdminRegistration, ChannelType, ClientConfig, ClientMessage, DataMessage, Endpoint,
    PublishChannel, RouteCommand, ServerMessage, SubscribeChannel, Value,
};
use spacebrew_transport::{
    SendThrottle, Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketReceiver,
    WebSocketTransport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::admin::{AdminMirror, ChannelRef};
use crate::builder::{ClientOptions, SpacebrewBuilder};
use crate::error::{ClientError, Result};

/// Boolean message callback: `(channel, value)`
pub type BooleanHandler = Arc<dyn Fn(&str, bool) + Send + Sync>;
/// Range message callback: `(channel, value)`
pub type RangeHandler = Arc<dyn Fn(&str, f64) + Send + Sync>;
/// String message callback: `(channel, value)`
pub type StringHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Custom type callback: `(channel, value, type)`
pub type CustomHandler = Arc<dyn Fn(&str, &Value, &ChannelType) + Send + Sync>;
/// Open/close callback
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Handlers {
    boolean: RwLock<Option<BooleanHandler>>,
    range: RwLock<Option<RangeHandler>>,
    string: RwLock<Option<StringHandler>>,
    custom: RwLock<Option<CustomHandler>>,
    open: RwLock<Option<EventHandler>>,
    close: RwLock<Option<EventHandler>>,
}

/// One live connection: the transport sender and its send throttle
struct Link {
    sender: Arc<dyn TransportSender>,
    throttle: SendThrottle,
}

struct Shared {
    options: ClientOptions,
    config: RwLock<ClientConfig>,
    link: RwLock<Option<Link>>,
    connected: RwLock<bool>,
    /// Set by an explicit close; stops the reconnect loop
    closing: AtomicBool,
    handlers: Handlers,
    admin: Option<AdminMirror>,
}

/// A Spacebrew client
pub struct Spacebrew {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Spacebrew {
    /// Create a new client (use builder for more options)
    pub fn new(options: ClientOptions) -> Self {
        let config = ClientConfig::new(&options.name, &options.description);
        let admin = options.admin.then(AdminMirror::new);

        Self {
            shared: Arc::new(Shared {
                options,
                config: RwLock::new(config),
                link: RwLock::new(None),
                connected: RwLock::new(false),
                closing: AtomicBool::new(false),
                handlers: Handlers::default(),
                admin,
            }),
            task: Mutex::new(None),
        }
    }

    /// Create a builder
    pub fn builder() -> SpacebrewBuilder {
        SpacebrewBuilder::new()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    pub fn name(&self) -> String {
        self.shared.config.read().name.clone()
    }

    pub fn config(&self) -> ClientConfig {
        self.shared.config.read().clone()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        *self.shared.connected.read()
    }

    /// Connect, declare this client and start the receive loop
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        self.shared.closing.store(false, Ordering::SeqCst);

        let receiver = Shared::open(&self.shared).await?;
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run(shared, receiver));

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    // =========================================================================
    // Channel declaration
    // =========================================================================

    /// Declare an outbound channel; re-sends the config when connected
    pub fn add_publish(
        &self,
        name: &str,
        channel_type: impl Into<ChannelType>,
        default: Option<Value>,
    ) -> Result<()> {
        let mut channel = PublishChannel::new(name, channel_type);
        channel.default = default;
        self.shared.config.write().add_publish(channel);
        self.update_config()
    }

    /// Declare an inbound channel; re-sends the config when connected
    pub fn add_subscribe(&self, name: &str, channel_type: impl Into<ChannelType>) -> Result<()> {
        self.shared
            .config
            .write()
            .add_subscribe(SubscribeChannel::new(name, channel_type));
        self.update_config()
    }

    fn update_config(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let config = self.shared.config.read().clone();
        self.send_control(&ClientMessage::Config(config))
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Publish a value on one of our channels.
    ///
    /// Sends are throttled to one per `send_interval`; while throttled only the
    /// most recent message is kept.
    pub fn send(&self, name: &str, channel_type: impl Into<ChannelType>, value: impl Into<Value>) -> Result<()> {
        let message = DataMessage::new(name, channel_type, value).from_client(&self.name());
        let data = codec::encode(&ClientMessage::Message(message))?;

        let link = self.shared.link.read();
        let link = link.as_ref().ok_or(ClientError::NotConnected)?;
        let outcome = link.throttle.submit(data, &link.sender)?;
        trace!("Send {}: {:?}", name, outcome);
        Ok(())
    }

    fn send_control(&self, message: &ClientMessage) -> Result<()> {
        let data = codec::encode(message)?;
        let link = self.shared.link.read();
        let link = link.as_ref().ok_or(ClientError::NotConnected)?;
        link.sender.try_send(data)?;
        Ok(())
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    pub fn on_boolean<F>(&self, f: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        *self.shared.handlers.boolean.write() = Some(Arc::new(f));
    }

    pub fn on_range<F>(&self, f: F)
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        *self.shared.handlers.range.write() = Some(Arc::new(f));
    }

    pub fn on_string<F>(&self, f: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        *self.shared.handlers.string.write() = Some(Arc::new(f));
    }

    pub fn on_custom<F>(&self, f: F)
    where
        F: Fn(&str, &Value, &ChannelType) + Send + Sync + 'static,
    {
        *self.shared.handlers.custom.write() = Some(Arc::new(f));
    }

    pub fn on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.handlers.open.write() = Some(Arc::new(f));
    }

    pub fn on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.handlers.close.write() = Some(Arc::new(f));
    }

    // =========================================================================
    // Admin
    // =========================================================================

    /// The admin mirror, if this client was built with `admin(true)`
    pub fn admin(&self) -> Option<&AdminMirror> {
        self.shared.admin.as_ref()
    }

    fn require_admin(&self) -> Result<&AdminMirror> {
        self.admin().ok_or(ClientError::NotAdmin)
    }

    pub fn add_route(&self, publisher: Endpoint, subscriber: Endpoint) -> Result<()> {
        self.require_admin()?;
        self.send_control(&ClientMessage::Route(RouteCommand::add(publisher, subscriber)))
    }

    pub fn remove_route(&self, publisher: Endpoint, subscriber: Endpoint) -> Result<()> {
        self.require_admin()?;
        self.send_control(&ClientMessage::Route(RouteCommand::remove(
            publisher, subscriber,
        )))
    }

    /// Add a route by name; channel types come from the admin mirror and must match
    pub fn add_route_by_name(&self, publisher: ChannelRef<'_>, subscriber: ChannelRef<'_>) -> Result<()> {
        let (publisher, subscriber) = self.require_admin()?.resolve_route(publisher, subscriber)?;
        self.add_route(publisher, subscriber)
    }

    pub fn remove_route_by_name(&self, publisher: ChannelRef<'_>, subscriber: ChannelRef<'_>) -> Result<()> {
        let (publisher, subscriber) = self.require_admin()?.resolve_route(publisher, subscriber)?;
        self.remove_route(publisher, subscriber)
    }

    /// Close the connection and stop reconnecting
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let was_connected = self.is_connected();
        self.shared.disconnect().await;
        if was_connected {
            self.shared.fire_close();
        }
    }
}

impl Drop for Spacebrew {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Shared {
    /// Open the transport and announce ourselves: admin registration first, then config
    async fn open(shared: &Arc<Shared>) -> Result<WebSocketReceiver> {
        let url = shared.options.url();
        info!("Connecting to {}", url);

        let (sender, receiver) = <WebSocketTransport as Transport>::connect(&url)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let sender: Arc<dyn TransportSender> = Arc::new(sender);

        if shared.admin.is_some() {
            let admin = ClientMessage::Admin(AdminRegistration {
                admin: true,
                no_msgs: true,
            });
            sender.send(codec::encode(&admin)?).await?;
        }
        let config = shared.config.read().clone();
        sender.send(codec::encode(&ClientMessage::Config(config))?).await?;

        *shared.link.write() = Some(Link {
            sender,
            throttle: SendThrottle::new(shared.options.send_interval),
        });
        *shared.connected.write() = true;
        info!("Connected to {} as {}", url, shared.options.name);

        let handler = shared.handlers.open.read().clone();
        if let Some(handler) = handler {
            handler();
        }
        Ok(receiver)
    }

    async fn disconnect(&self) {
        *self.connected.write() = false;
        let link = self.link.write().take();
        if let Some(link) = link {
            link.throttle.cancel();
            let _ = link.sender.close().await;
        }
        if let Some(admin) = &self.admin {
            admin.clear();
        }
    }

    fn fire_close(&self) {
        let handler = self.handlers.close.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn handle_frame(&self, data: &Bytes) {
        if self.options.debug {
            info!("Received {}", String::from_utf8_lossy(data));
        }

        match codec::decode_server(data) {
            Ok(ServerMessage::Data(message)) => self.handle_data(message),
            Ok(ServerMessage::Admin(event)) => match &self.admin {
                Some(admin) => {
                    let own = self.config.read().clone();
                    admin.handle_event(event, &own);
                }
                None => trace!("Ignoring admin event"),
            },
            Err(e) => warn!("Decode error: {}", e),
        }
    }

    fn handle_data(&self, message: DataMessage) {
        // Monitor copies sent to admins carry the sender's name
        if self.admin.is_some() && message.client_name.is_some() {
            return;
        }

        let name = message.name.as_str();
        match &message.channel_type {
            ChannelType::Boolean => {
                let handler = self.handlers.boolean.read().clone();
                if let Some(handler) = handler {
                    handler(name, message.value.as_bool_flag().unwrap_or(false));
                }
            }
            ChannelType::Range => {
                let handler = self.handlers.range.read().clone();
                match (handler, message.value.as_range()) {
                    (Some(handler), Some(value)) => handler(name, value),
                    (Some(_), None) => debug!("Non-numeric range value on {}", name),
                    _ => {}
                }
            }
            ChannelType::String => {
                let handler = self.handlers.string.read().clone();
                if let Some(handler) = handler {
                    match message.value.as_text() {
                        Some(text) => handler(name, text),
                        None => handler(name, &value_text(&message.value)),
                    }
                }
            }
            ChannelType::Custom(_) => {
                let handler = self.handlers.custom.read().clone();
                if let Some(handler) = handler {
                    handler(name, &message.value, &message.channel_type);
                }
            }
        }
    }
}

/// Plain-text rendering of non-string values on string channels
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

/// Receive loop; reconnects on a fixed interval when enabled
async fn run(shared: Arc<Shared>, mut receiver: WebSocketReceiver) {
    loop {
        while let Some(event) = receiver.recv().await {
            match event {
                TransportEvent::Data(data) => shared.handle_frame(&data),
                TransportEvent::Disconnected { reason } => {
                    info!("Disconnected: {:?}", reason);
                    break;
                }
                TransportEvent::Error(e) => warn!("Connection error: {}", e),
                TransportEvent::Connected => {}
            }
        }

        shared.disconnect().await;
        shared.fire_close();

        if !shared.options.reconnect || shared.closing.load(Ordering::SeqCst) {
            return;
        }

        receiver = loop {
            tokio::time::sleep(shared.options.reconnect_interval).await;
            if shared.closing.load(Ordering::SeqCst) {
                return;
            }
            debug!("Attempting to reconnect to {}", shared.options.url());
            match Shared::open(&shared).await {
                Ok(receiver) => break receiver,
                Err(e) => debug!("Reconnect failed: {}", e),
            }
        };
    }
}
