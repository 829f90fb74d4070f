//! WebSocket transport implementation
//!
//! Spacebrew frames are JSON documents sent as text messages. Each connection
//! runs one writer task fed by a bounded queue and one reader task that turns
//! websocket messages into [`TransportEvent`]s.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{Message as WsMessage, WebSocketConfig as ProtocolConfig},
    WebSocketStream,
};
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before `try_send` reports backpressure
    pub outbound_capacity: usize,
    /// How long an accepted socket may take to complete the upgrade
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64KB
            outbound_capacity: 100,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSocketConfig {
    fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}

/// WebSocket transport
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Connect with explicit queue and message size limits
    pub async fn connect_with_config(
        url: &str,
        config: &WebSocketConfig,
    ) -> Result<(WebSocketSender, WebSocketReceiver)> {
        url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, config.outbound_capacity))
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

/// JSON frames go out as text; anything that is not UTF-8 falls back to binary
fn frame(data: Bytes) -> WsMessage {
    match String::from_utf8(data.to_vec()) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => WsMessage::Binary(e.into_bytes()),
    }
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(frame(data))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn try_send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }

        self.tx.try_send(frame(data)).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure,
            TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        Self::connect_with_config(url, &WebSocketConfig::default()).await
    }
}

/// Split the stream and spawn the writer and reader tasks
fn spawn_io<S>(ws_stream: WebSocketStream<S>, capacity: usize) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity.max(1));
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Writer task
    tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Reader task
    tokio::spawn(async move {
        let mut read = read;

        let _ = event_tx.send(TransportEvent::Connected).await;

        let mut reason = None;
        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Data(Bytes::from(text))).await;
                }
                Ok(WsMessage::Binary(data)) => {
                    let _ = event_tx.send(TransportEvent::Data(Bytes::from(data))).await;
                }
                Ok(WsMessage::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Ok(_) => {
                    // Ping/pong are answered by tungstenite
                }
                Err(e) => {
                    debug!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    reason = Some(e.to_string());
                    break;
                }
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx
            .send(TransportEvent::Disconnected { reason })
            .await;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
    };
    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

type Handshake = (SocketAddr, Result<WebSocketStream<TcpStream>>);

/// WebSocket server
///
/// Upgrades run on their own tasks, so a peer that opens a socket and never
/// finishes the handshake does not hold up anyone else.
pub struct WebSocketServer {
    listener: TcpListener,
    config: WebSocketConfig,
    handshakes: JoinSet<Handshake>,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
            handshakes: JoinSet::new(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted
                        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
                    debug!("Accepted TCP connection from {}", addr);
                    self.handshakes
                        .spawn(handshake(stream, addr, self.config.clone()));
                }
                Some(joined) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    match joined {
                        Ok((addr, Ok(ws_stream))) => {
                            info!("WebSocket client connected from {}", addr);
                            let (sender, receiver) =
                                spawn_io(ws_stream, self.config.outbound_capacity);
                            return Ok((sender, receiver, addr));
                        }
                        Ok((addr, Err(e))) => debug!("Handshake with {} failed: {}", addr, e),
                        Err(e) => error!("Handshake task failed: {}", e),
                    }
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }

    async fn close(&self) -> Result<()> {
        // TCP listener doesn't need explicit close
        Ok(())
    }
}

async fn handshake(stream: TcpStream, addr: SocketAddr, config: WebSocketConfig) -> Handshake {
    let upgrade = tokio_tungstenite::accept_async_with_config(stream, Some(config.protocol()));
    let result = match tokio::time::timeout(config.handshake_timeout, upgrade).await {
        Ok(Ok(ws_stream)) => Ok(ws_stream),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Err(_) => Err(TransportError::ConnectionFailed(format!(
            "no upgrade within {:?}",
            config.handshake_timeout
        ))),
    };
    (addr, result)
}
