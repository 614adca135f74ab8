//! # Chat Relay Server Library
//!
//! This library provides the server side of a line-oriented chat room. It
//! accepts many concurrent TCP connections, learns an identity for each one,
//! and relays every chat message it receives from one client to all others
//! while announcing joins and departures.
//!
//! ## Architecture Overview
//!
//! ### One Task Per Connection
//! Every accepted connection gets its own session task that blocks on
//! reading frames, plus a writer task that drains the connection's outbox.
//! A slow or dead client can only ever stall its own writer.
//!
//! ### Owned Registry
//! The [`registry::ClientRegistry`] is created by the [`network::Server`] and
//! injected into each session behind a single mutex. Broadcasts iterate a
//! point-in-time snapshot, so a broadcast never holds the lock while
//! delivering.
//!
//! ### Server-Side Attribution
//! Relayed chat is always attributed to the identity registered for the
//! sending connection. The `from` field a client writes is never trusted.
//!
//! ## Module Organization
//!
//! - `registry`: connection handles and the identity registry
//! - `broadcast`: fan-out with per-recipient failure isolation
//! - `session`: the per-connection state machine and read loop
//! - `network`: listener, admission policy and shutdown
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new("0.0.0.0:8080", ServerConfig::default()).await?;
//!     let shutdown = server.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.trigger();
//!     });
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;

pub use error::ServerError;
pub use network::{Server, ServerConfig, ShutdownHandle};
