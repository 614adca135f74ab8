//! Client network layer: connection, inbound dispatch and reconnection
//!
//! The inbound task owns the reading half of the connection. When the server
//! goes away it drops the writing half, so sends fail with
//! [`ClientError::NotConnected`], and then redials at a fixed interval until
//! the server is reachable again. Every new connection re-announces the same
//! identity, since the server forgot the old one when the connection died.

use crate::display::ChatDisplay;
use log::{debug, info, warn};
use shared::transport::{self, TcpFrameReader, TcpFrameWriter};
use shared::{decode, encode, CodecError, Message, MessageType, TransportError};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("error connecting to server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("not connected to server")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error("failed to send message: {0}")]
    Write(#[source] TransportError),
    #[error("timed out sending message after {0:?}")]
    SendTimeout(Duration),
}

/// Where to connect and how to behave when the connection drops
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Nickname to announce; the local address is used when absent
    pub name: Option<String>,
    /// Fixed pause between reconnection attempts
    pub reconnect_delay: Duration,
    /// How long a single outbound write may stall before the connection is
    /// considered dead
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: shared::DEFAULT_PORT,
            name: None,
            reconnect_delay: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn nickname(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// State shared between the interactive side and the inbound task
struct Link {
    server_addr: String,
    reconnect_delay: Duration,
    send_timeout: Duration,
    identity: String,
    display: Arc<dyn ChatDisplay>,
    /// Absent while disconnected
    writer: Mutex<Option<TcpFrameWriter>>,
}

/// A connected chat client
pub struct ChatClient {
    link: Arc<Link>,
    inbound: JoinHandle<()>,
}

impl ChatClient {
    /// Connects, announces identity and starts receiving messages
    ///
    /// Failing to reach the server here is reported to the caller; only
    /// later disconnections are retried automatically.
    pub async fn connect(
        config: ClientConfig,
        display: Arc<dyn ChatDisplay>,
    ) -> Result<Self, ClientError> {
        let server_addr = config.server_addr();
        let stream = dial(&server_addr).await?;

        let identity = match config.nickname() {
            Some(name) => name.to_string(),
            None => stream
                .local_addr()
                .map(|addr| addr.ip().to_string())
                .map_err(|source| ClientError::Connect {
                    addr: server_addr.clone(),
                    source,
                })?,
        };

        let link = Arc::new(Link {
            server_addr,
            reconnect_delay: config.reconnect_delay,
            send_timeout: config.send_timeout,
            identity,
            display,
            writer: Mutex::new(None),
        });

        link.display
            .on_system_notice(&format!("Your identity: {}", link.identity));
        let reader = link.attach(stream).await?;
        link.display.on_system_notice("Connected to server.");

        let inbound = tokio::spawn(receive_messages(Arc::clone(&link), reader));

        Ok(ChatClient { link, inbound })
    }

    pub fn identity(&self) -> &str {
        &self.link.identity
    }

    pub async fn is_connected(&self) -> bool {
        self.link.writer.lock().await.is_some()
    }

    /// Sends a chat line to the room
    ///
    /// Fails with [`ClientError::NotConnected`] while a reconnection is in
    /// progress. A failed or stalled write drops the connection's writing
    /// half so the server notices and the inbound task starts reconnecting.
    /// The writer lock is never held longer than `send_timeout`.
    pub async fn send_chat(&self, text: &str) -> Result<(), ClientError> {
        let frame = encode(&Message::chat(self.link.identity.as_str(), text))?;

        let mut slot = self.link.writer.lock().await;
        let writer = slot.as_mut().ok_or(ClientError::NotConnected)?;

        let limit = self.link.send_timeout;
        let error = match timeout(limit, writer.write_frame(frame.as_bytes())).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => ClientError::Write(e),
            Err(_) => ClientError::SendTimeout(limit),
        };

        warn!("Dropping connection to {}: {}", self.link.server_addr, error);
        slot.take();
        Err(error)
    }

    /// Stops receiving and closes the connection
    pub async fn close(self) {
        self.inbound.abort();
        if let Some(mut writer) = self.link.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down connection: {}", e);
            }
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

impl Link {
    /// Splits a fresh stream, announces identity and installs the writer
    async fn attach(&self, stream: TcpStream) -> Result<TcpFrameReader, ClientError> {
        let (reader, mut writer) = transport::split(stream);

        let frame = encode(&Message::identify(self.identity.as_str()))?;
        writer
            .write_frame(frame.as_bytes())
            .await
            .map_err(ClientError::Write)?;

        *self.writer.lock().await = Some(writer);
        info!("Connected to {} as {}", self.server_addr, self.identity);
        Ok(reader)
    }

    /// Redials at a fixed interval until the server accepts us again
    ///
    /// Every attempt waits `reconnect_delay` first, so a server that accepts
    /// and immediately closes is still dialed at most once per interval.
    async fn reconnect(&self) -> TcpFrameReader {
        loop {
            sleep(self.reconnect_delay).await;

            let attempt = match dial(&self.server_addr).await {
                Ok(stream) => self.attach(stream).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(reader) => return reader,
                Err(e) => {
                    warn!("Reconnection to {} failed: {}", self.server_addr, e);
                    self.display.on_system_notice(&format!(
                        "Reconnection failed, retrying in {:?}: {}",
                        self.reconnect_delay, e
                    ));
                }
            }
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(message) => message,
            Err(e) if e.is_unknown_type() => return,
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                self.display
                    .on_system_notice(&format!("Failed to parse message. err: {}", e));
                return;
            }
        };

        match message.kind {
            MessageType::Chat => self.display.on_chat_message(&message.from, &message.body),
            MessageType::Joined | MessageType::Left | MessageType::System => {
                self.display.on_system_notice(&message.body)
            }
            MessageType::Identify => debug!("Ignoring identity frame from server"),
        }
    }
}

async fn dial(addr: &str) -> Result<TcpStream, ClientError> {
    TcpStream::connect(addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })
}

/// Inbound loop: display every frame, reconnect whenever the stream ends
async fn receive_messages(link: Arc<Link>, mut reader: TcpFrameReader) {
    loop {
        match reader.read_frame().await {
            Ok(frame) => link.dispatch(&frame),
            Err(e) => {
                debug!("Inbound stream ended: {}", e);
                link.writer.lock().await.take();
                link.display.on_system_notice("Disconnected from server.");

                reader = link.reconnect().await;
                link.display.on_system_notice("Reconnected to server.");
            }
        }
    }
}
