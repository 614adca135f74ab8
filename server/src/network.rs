//! Server network layer: TCP listener, admission and session spawning

use crate::error::ServerError;
use crate::registry::{ClientRegistry, ConnectionId, SharedRegistry};
use crate::session::{serve_connection, SessionContext};
use log::{debug, error, info, warn};
use shared::transport::{self, TcpFrameWriter};
use shared::{encode, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

/// How long a stopping server waits for its sessions to say goodbye
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tunables for a [`Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Concurrent connections admitted before new ones are turned away
    pub max_clients: usize,
    /// Close connections that send nothing for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 64,
            idle_timeout: None,
        }
    }
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stops the accept loop and closes every open session
    pub fn trigger(&self) {
        self.signal.send_replace(true);
    }
}

/// Chat relay server owning the listener and the client registry
pub struct Server {
    listener: TcpListener,
    registry: SharedRegistry,
    config: ServerConfig,
    admission: Arc<Semaphore>,
    next_connection_id: u64,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Binds the listener; failing to bind is the only fatal server error
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let (shutdown, _) = watch::channel(false);

        Ok(Server {
            listener,
            registry: ClientRegistry::shared(),
            admission: Arc::new(Semaphore::new(config.max_clients)),
            config,
            next_connection_id: 1,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            signal: Arc::clone(&self.shutdown),
        }
    }

    /// Accepts connections until shut down, one task per connection
    ///
    /// On shutdown every session is told to close, and this waits briefly
    /// for their departure announcements before returning.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        match self.listener.local_addr() {
            Ok(addr) => info!("Chatroom server started on {}", addr),
            Err(_) => info!("Chatroom server started"),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr, &mut sessions),
                    Err(e) => {
                        error!("Connection error: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Session task failed: {}", e);
                    }
                },
                _ = shutdown.changed() => {},
            }
        }

        info!("Server shutting down, closing {} session(s)", sessions.len());
        self.shutdown.send_replace(true);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Sessions still open after {:?}, aborting", SHUTDOWN_GRACE);
            sessions.abort_all();
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr, sessions: &mut JoinSet<()>) {
        let permit = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Rejected connection from {}: server full ({} clients)",
                    addr, self.config.max_clients
                );
                let (_, writer) = transport::split(stream);
                sessions.spawn(reject(writer));
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;

        let (reader, writer) = transport::split(stream);
        let ctx = SessionContext {
            registry: Arc::clone(&self.registry),
            idle_timeout: self.config.idle_timeout,
            shutdown: self.shutdown.subscribe(),
        };

        sessions.spawn(async move {
            serve_connection(id, addr, reader, writer, ctx).await;
            drop(permit);
        });
    }
}

/// Tells a connection beyond capacity why it is being closed
async fn reject(mut writer: TcpFrameWriter) {
    match encode(&Message::system("Server full")) {
        Ok(frame) => {
            if let Err(e) = writer.write_frame(frame.as_bytes()).await {
                debug!("Could not send rejection notice: {}", e);
            }
        }
        Err(e) => error!("Error encoding rejection notice: {}", e),
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Error closing rejected connection: {}", e);
    }
}
