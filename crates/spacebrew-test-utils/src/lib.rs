//! Common test helpers and utilities for Spacebrew tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A test router with RAII cleanup
//! - A raw JSON connection for driving the wire protocol by hand
//! - An in-memory transport sender for exercising the router core in-process
//! - A collector for values received through client callbacks

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use spacebrew_client::SpacebrewBuilder;
use spacebrew_core::{codec, ClientMessage, ServerMessage, Value};
use spacebrew_router::{Router, RouterConfig, RouterCore};
use spacebrew_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketReceiver,
    WebSocketSender, WebSocketTransport,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || async { flag.load(Ordering::SeqCst) },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Test Router - RAII wrapper with proper cleanup
// ============================================================================

/// A test router that automatically shuts down on drop
pub struct TestRouter {
    port: u16,
    core: Arc<RouterCore>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestRouter {
    /// Start a test router with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(RouterConfig {
            name: "Test Router".to_string(),
            ..Default::default()
        })
        .await
    }

    /// Start a test router with custom configuration
    pub async fn start_with_config(config: RouterConfig) -> Self {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);

        let router = Router::new(config);
        let core = router.core();

        let handle = tokio::spawn(async move {
            let _ = router.serve_websocket(&addr).await;
        });

        // Wait until the port is accepting connections
        let _ = wait_for(
            || async move {
                tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
                    .await
                    .is_ok()
            },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await;

        Self {
            port,
            core,
            handle: Some(handle),
        }
    }

    /// Get the WebSocket URL for this router
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared router state, for assertions
    pub fn core(&self) -> &RouterCore {
        &self.core
    }

    /// Client builder pointed at this router, with throttling and reconnect off
    pub fn client(&self, name: &str) -> SpacebrewBuilder {
        SpacebrewBuilder::new()
            .server("127.0.0.1")
            .port(self.port)
            .name(name)
            .send_interval(0)
            .reconnect(false)
    }

    /// Open a raw JSON connection
    pub async fn connect_raw(&self) -> TestConnection {
        TestConnection::connect(&self.url()).await
    }

    /// Wait until the router has `count` registered clients
    pub async fn wait_for_clients(&self, count: usize) -> bool {
        wait_for(
            || async { self.core.registry().len() == count },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    }

    /// Wait until the router holds `count` routes
    pub async fn wait_for_routes(&self, count: usize) -> bool {
        wait_for(
            || async { self.core.routes().len() == count },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    }

    /// Stop the router explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Raw connection
// ============================================================================

/// A bare WebSocket connection speaking JSON frames
pub struct TestConnection {
    sender: WebSocketSender,
    receiver: WebSocketReceiver,
}

impl TestConnection {
    pub async fn connect(url: &str) -> Self {
        let (sender, receiver) = <WebSocketTransport as Transport>::connect(url)
            .await
            .expect("test connection failed");
        Self { sender, receiver }
    }

    pub async fn send(&self, message: &ClientMessage) {
        let data = codec::encode(message).expect("encode failed");
        self.sender.send(data).await.expect("send failed");
    }

    pub async fn send_json(&self, value: serde_json::Value) {
        let data = Bytes::from(serde_json::to_vec(&value).expect("json encode failed"));
        self.sender.send(data).await.expect("send failed");
    }

    /// Next data frame as JSON, or None on timeout or close
    pub async fn recv_json(&mut self, max_wait: Duration) -> Option<serde_json::Value> {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Data(data))) => {
                    return serde_json::from_slice(&data).ok();
                }
                Ok(Some(TransportEvent::Connected)) => continue,
                Ok(Some(_)) | Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next data frame decoded as a server message
    pub async fn recv_server(&mut self, max_wait: Duration) -> Option<ServerMessage> {
        let value = self.recv_json(max_wait).await?;
        let data = serde_json::to_vec(&value).ok()?;
        codec::decode_server(&data).ok()
    }

    /// Skip frames until one satisfies `matches`
    pub async fn recv_until<F>(&mut self, max_wait: Duration, matches: F) -> Option<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let deadline = Instant::now() + max_wait;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let value = self.recv_json(remaining).await?;
            if matches(&value) {
                return Some(value);
            }
        }
    }

    /// True if no data frame arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) -> bool {
        self.recv_json(window).await.is_none()
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

// ============================================================================
// In-memory sender
// ============================================================================

/// A transport sender that records every frame instead of writing it
pub struct RecordingSender {
    frames: Mutex<Vec<Bytes>>,
    connected: AtomicBool,
    capacity: Option<usize>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            capacity: None,
        })
    }

    /// A sender whose queue reports backpressure after `capacity` frames
    pub fn bounded(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            capacity: Some(capacity),
        })
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Recorded frames parsed as JSON
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| serde_json::from_slice(f).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportSender for RecordingSender {
    async fn send(&self, data: Bytes) -> spacebrew_transport::Result<()> {
        self.try_send(data)
    }

    fn try_send(&self, data: Bytes) -> spacebrew_transport::Result<()> {
        if !self.is_connected() {
            return Err(spacebrew_transport::TransportError::ConnectionClosed);
        }
        let mut frames = self.frames.lock();
        if let Some(capacity) = self.capacity {
            if frames.len() >= capacity {
                return Err(spacebrew_transport::TransportError::Backpressure);
            }
        }
        frames.push(data);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> spacebrew_transport::Result<()> {
        self.disconnect();
        Ok(())
    }
}

/// Peer address for in-process sessions
pub fn peer(ip: &str, port: u16) -> SocketAddr {
    format!("{}:{}", ip, port).parse().expect("invalid peer address")
}

// ============================================================================
// Collectors
// ============================================================================

/// Collects `(channel, value)` pairs from client callbacks
#[derive(Clone, Default)]
pub struct MessageCollector {
    values: Arc<Mutex<Vec<(String, Value)>>>,
    notify: Arc<Notify>,
    count: Arc<AtomicU32>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, channel: &str, value: Value) {
        self.values.lock().push((channel.to_string(), value));
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Callback for `on_boolean`
    pub fn boolean(&self) -> impl Fn(&str, bool) + Send + Sync + 'static {
        let collector = self.clone();
        move |channel, value| collector.push(channel, Value::Bool(value))
    }

    /// Callback for `on_range`
    pub fn range(&self) -> impl Fn(&str, f64) + Send + Sync + 'static {
        let collector = self.clone();
        move |channel, value| collector.push(channel, Value::Float(value))
    }

    /// Callback for `on_string`
    pub fn string(&self) -> impl Fn(&str, &str) + Send + Sync + 'static {
        let collector = self.clone();
        move |channel, value| collector.push(channel, Value::from(value))
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n values to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    pub fn values(&self) -> Vec<(String, Value)> {
        self.values.lock().clone()
    }

    pub fn last_value(&self) -> Option<(String, Value)> {
        self.values.lock().last().cloned()
    }
}
