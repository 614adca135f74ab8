//! Per-connection session loop
//!
//! Each accepted connection is owned by exactly one session, which moves
//! through `Connected -> Identified -> Relaying -> Closed`:
//! - An identity announcement registers the connection and announces the join
//! - Chat from an identified connection is relayed under its registered
//!   identity, never the `from` the client wrote into the frame
//! - Whatever ends the read loop, an identified session is unregistered and
//!   its departure announced exactly once
//!
//! Writes go through a dedicated writer task fed by the connection's outbox,
//! so a peer that stops reading can only stall its own writer.

use crate::broadcast::{broadcast, enqueue};
use crate::registry::{ConnectionId, Outbox, SharedRegistry, OUTBOX_CAPACITY};
use log::{debug, info, warn};
use shared::{decode, encode, FrameReader, FrameWriter, Message, MessageType, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

/// How long a closing session waits for queued frames to reach the peer
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, identity not yet announced
    Connected,
    /// Registered and announced to the room
    Identified,
    /// Identified and has relayed at least one chat message
    Relaying,
    /// Read loop ended; never left again
    Closed,
}

/// Everything a session needs from the server that spawned it
#[derive(Clone)]
pub struct SessionContext {
    pub registry: SharedRegistry,
    /// Reads that see no frame for this long end the session
    pub idle_timeout: Option<Duration>,
    /// Flips to `true` when the server shuts down
    pub shutdown: watch::Receiver<bool>,
}

struct Session<R> {
    id: ConnectionId,
    addr: SocketAddr,
    reader: FrameReader<R>,
    outbox: Outbox,
    registry: SharedRegistry,
    idle_timeout: Option<Duration>,
    state: SessionState,
    identity: Option<String>,
}

/// Runs one connection from accept to close
///
/// Returns once the connection is closed, unregistered and its departure
/// has been broadcast.
pub async fn serve_connection<R, W>(
    id: ConnectionId,
    addr: SocketAddr,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    ctx: SessionContext,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, queue) = mpsc::channel(OUTBOX_CAPACITY);
    let (failed_tx, mut write_failed) = oneshot::channel();
    let mut writer_task = tokio::spawn(run_writer(id, addr, writer, queue, failed_tx));
    let mut shutdown = ctx.shutdown;

    info!("Connection {} accepted from {}", id, addr);

    let mut session = Session {
        id,
        addr,
        reader,
        outbox,
        registry: ctx.registry,
        idle_timeout: ctx.idle_timeout,
        state: SessionState::Connected,
        identity: None,
    };

    let reason = loop {
        if *shutdown.borrow() {
            break "server shutting down";
        }

        tokio::select! {
            result = session.next_frame() => match result {
                Ok(frame) => session.handle_frame(&frame).await,
                Err(TransportError::ConnectionClosed) => break "connection closed",
                Err(e) => {
                    warn!("Closing connection {} from {}: {}", id, addr, e);
                    break "transport error";
                }
            },
            _ = &mut write_failed => break "write failed",
            _ = shutdown.changed() => break "server shutting down",
        }
    };

    session.close(reason).await;

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        debug!("Writer for connection {} did not drain, aborting", id);
        writer_task.abort();
    }
}

impl<R: AsyncRead + Unpin> Session<R> {
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.idle_timeout {
            Some(limit) => match timeout(limit, self.reader.read_frame()).await {
                Ok(result) => result,
                Err(_) => {
                    info!("Connection {} from {} idle for {:?}", self.id, self.addr, limit);
                    Err(TransportError::ConnectionClosed)
                }
            },
            None => self.reader.read_frame().await,
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(message) => message,
            Err(e) if e.is_unknown_type() => return,
            Err(e) => {
                warn!("Error decoding message from {}: {}", self.addr, e);
                return;
            }
        };

        match message.kind {
            MessageType::Identify => self.identify(&message.body).await,
            MessageType::Chat => self.relay_chat(message.body).await,
            kind => debug!("Ignoring {} message sent by client {}", kind, self.addr),
        }
    }

    async fn identify(&mut self, announced: &str) {
        if let Some(identity) = &self.identity {
            warn!(
                "Connection {} tried to change identity from {} to {}",
                self.id, identity, announced
            );
            let notice = format!("You are already identified as {}.", identity);
            self.notify(&Message::system(notice));
            return;
        }

        let identity = announced.trim();
        if identity.is_empty() {
            self.notify(&Message::system("Identity must not be empty."));
            return;
        }

        let others = {
            let mut registry = self.registry.lock().await;
            registry.register(self.id, identity, self.outbox.clone());
            registry.len() - 1
        };

        self.identity = Some(identity.to_string());
        self.state = SessionState::Identified;
        info!("{} connected from {} ({})", identity, self.addr, self.id);

        self.notify(&Message::system(format!(
            "Welcome, {}. {} other client(s) online.",
            identity, others
        )));
        self.fan_out(&Message::joined(identity)).await;
    }

    async fn relay_chat(&mut self, body: String) {
        let Some(identity) = &self.identity else {
            debug!("Chat from unidentified connection {} dropped", self.id);
            self.notify(&Message::system("Announce your identity before chatting."));
            return;
        };

        let message = Message::chat(identity.as_str(), body);
        self.state = SessionState::Relaying;
        self.fan_out(&message).await;
    }

    /// Broadcasts to everyone but this connection
    async fn fan_out(&self, message: &Message) {
        let delivery = broadcast(&self.registry, message, self.id).await;
        if delivery.failed > 0 {
            warn!(
                "{} message from connection {} reached {} of {} recipient(s)",
                message.kind,
                self.id,
                delivery.delivered,
                delivery.delivered + delivery.failed
            );
        } else {
            debug!(
                "{} message from connection {} reached {} recipient(s)",
                message.kind, self.id, delivery.delivered
            );
        }
    }

    /// Sends a message to this connection only
    fn notify(&self, message: &Message) {
        let frame: Arc<str> = match encode(message) {
            Ok(frame) => frame.into(),
            Err(e) => {
                warn!("Error encoding notice for {}: {}", self.addr, e);
                return;
            }
        };

        if let Err(reason) = enqueue(&self.outbox, &frame) {
            debug!("Notice to connection {} not queued: {}", self.id, reason);
        }
    }

    async fn close(mut self, reason: &str) {
        debug!("Connection {} closing from {:?}", self.id, self.state);
        self.state = SessionState::Closed;

        let Some(identity) = self.identity.take() else {
            info!(
                "Connection {} from {} closed before identifying ({})",
                self.id, self.addr, reason
            );
            return;
        };

        self.registry.lock().await.unregister(&self.id);
        self.fan_out(&Message::left(&identity)).await;
        info!("{} disconnected ({})", identity, reason);
    }
}

async fn run_writer<W>(
    id: ConnectionId,
    addr: SocketAddr,
    mut writer: FrameWriter<W>,
    mut queue: mpsc::Receiver<Arc<str>>,
    failed: oneshot::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_frame(frame.as_bytes()).await {
            warn!("Delivery failed to connection {} ({}): {}", id, addr, e);
            let _ = failed.send(());
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error shutting down connection {}: {}", id, e);
    }
}
