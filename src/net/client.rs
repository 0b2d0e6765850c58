//! Remote monitoring client with keepalive pings and automatic reconnection.

use super::protocol::{write_message, MessageReader, MessageType, NetworkMessage, DEFAULT_PORT};
use crate::error::{BackupError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect: bool,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            reconnect: true,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

struct Inner {
    config: ClientConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    incoming: broadcast::Sender<NetworkMessage>,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

impl RemoteClient {
    /// Connects, then keeps the session alive in the background. Fails only
    /// if the first connection attempt does.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let (reader, writer) = open(&config).await?;
        let (incoming, _) = broadcast::channel(256);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let client = Self {
            inner: Arc::new(Inner {
                config,
                writer: Mutex::new(Some(writer)),
                connected: AtomicBool::new(true),
                incoming,
                shutdown,
            }),
        };
        info!("Connected to {}", client.inner.config.address);

        let inner = client.inner.clone();
        tokio::spawn(async move { supervise(inner, reader, shutdown_rx).await });
        Ok(client)
    }

    /// Every message received from the server from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkMessage> {
        self.inner.incoming.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Sends a job command. Without a connection the command is dropped
    /// with a warning.
    pub async fn send_command(&self, kind: MessageType, job_names: &[String]) -> Result<()> {
        let message = NetworkMessage::command(kind, job_names)?;
        self.inner.send(&message).await
    }

    pub async fn request_status(&self) -> Result<()> {
        self.inner.send(&NetworkMessage::new(MessageType::JobStatusRequest)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.send(&NetworkMessage::new(MessageType::Ping)).await
    }

    /// Closes the connection and stops reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.drop_connection().await;
    }
}

impl Inner {
    async fn send(&self, message: &NetworkMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            warn!("Not connected, dropping {:?}", message.kind);
            return Ok(());
        };
        if let Err(e) = write_message(stream, message).await {
            *writer = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn drop_connection(&self) {
        *self.writer.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

async fn open(config: &ClientConfig) -> Result<(MessageReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| {
            BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connecting to {} timed out", config.address),
            ))
        })??;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    Ok((MessageReader::new(read_half), write_half))
}

async fn supervise(
    inner: Arc<Inner>,
    mut reader: MessageReader<OwnedReadHalf>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        run_session(&inner, &mut reader, &mut shutdown).await;
        inner.drop_connection().await;

        if inner.shutting_down() || !inner.config.reconnect {
            debug!("Client session ended");
            return;
        }

        let mut backoff = inner.config.initial_backoff;
        reader = loop {
            info!("Reconnecting to {} in {:?}", inner.config.address, backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return,
            }
            match open(&inner.config).await {
                Ok((reader, writer)) => {
                    *inner.writer.lock().await = Some(writer);
                    inner.connected.store(true, Ordering::SeqCst);
                    info!("Reconnected to {}", inner.config.address);
                    break reader;
                }
                Err(e) => {
                    warn!("Reconnect to {} failed: {}", inner.config.address, e);
                    backoff = (backoff * 2).min(inner.config.max_backoff);
                }
            }
        };
    }
}

/// Reads until the connection drops or shutdown is requested.
async fn run_session(
    inner: &Inner,
    reader: &mut MessageReader<OwnedReadHalf>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ping = tokio::time::interval(inner.config.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            incoming = reader.next_message() => match incoming {
                Ok(Some(message)) => {
                    if message.kind == MessageType::Error {
                        warn!("Server error: {}", message.error_text().unwrap_or_default());
                    }
                    // No subscribers is fine.
                    let _ = inner.incoming.send(message);
                }
                Ok(None) => {
                    info!("Server closed the connection");
                    return;
                }
                Err(e) => {
                    warn!("Connection lost: {}", e);
                    return;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = inner.send(&NetworkMessage::new(MessageType::Ping)).await {
                    warn!("Ping failed: {}", e);
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
