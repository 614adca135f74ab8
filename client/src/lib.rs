//! # Chat Client Library
//!
//! This library provides the client side of the line-oriented chat room. It
//! connects to a relay server, announces an identity, shows incoming chat and
//! room notices through a display collaborator, and sends chat typed by the
//! user.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Owns the connection to the server:
//! - Identity announcement on every (re)connect
//! - Inbound frame decoding and dispatch by message type
//! - Fixed-interval reconnection after the server goes away
//! - Outbound chat that fails safely while disconnected
//!
//! ### Display Module (`display`)
//! The [`display::ChatDisplay`] trait the network layer reports to, and a
//! plain terminal implementation. Richer front ends implement the same trait.

pub mod display;
pub mod network;

pub use display::{ChatDisplay, TerminalDisplay};
pub use network::{ChatClient, ClientConfig, ClientError};
