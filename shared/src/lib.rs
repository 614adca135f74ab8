//! Protocol types shared by the chat relay server and its clients
//!
//! Every exchange between a client and the server is a [`Message`] carried in
//! one newline-delimited text frame. The [`codec`] module turns messages into
//! frames and back, and the [`transport`] module moves frames over a byte
//! stream.

pub mod codec;
pub mod transport;

pub use codec::{decode, encode, CodecError};
pub use transport::{FrameReader, FrameWriter, TransportError};

use serde::Serialize;
use std::fmt;

pub const DEFAULT_PORT: u16 = 8080;

/// Identity used in the `from` field of notices the server itself authors
pub const SERVER_IDENTITY: &str = "server";

/// Kind of a protocol message
///
/// The wire tags are the lowercase names, except for [`MessageType::Identify`]
/// which travels as `ip` for compatibility with address-based identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// User-authored text to relay
    Chat,
    /// Client declares its identity to the server
    #[serde(rename = "ip")]
    Identify,
    /// A peer entered the room
    Joined,
    /// A peer left the room
    Left,
    /// Informational notice from the server
    System,
}

impl MessageType {
    /// Returns the tag written on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::Identify => "ip",
            MessageType::Joined => "joined",
            MessageType::Left => "left",
            MessageType::System => "system",
        }
    }

    /// Maps a wire tag to a message type, accepting the legacy aliases
    /// `nickname` and `other`
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "chat" => Some(MessageType::Chat),
            "ip" | "nickname" => Some(MessageType::Identify),
            "joined" => Some(MessageType::Joined),
            "left" => Some(MessageType::Left),
            "system" | "other" => Some(MessageType::System),
            _ => None,
        }
    }

    /// True for types only the server is allowed to originate
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            MessageType::Joined | MessageType::Left | MessageType::System
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of protocol exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    #[serde(rename = "message")]
    pub body: String,
}

impl Message {
    pub fn new(kind: MessageType, from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            from: from.into(),
            body: body.into(),
        }
    }

    pub fn chat(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(MessageType::Chat, from, body)
    }

    /// Identity announcement; the identity travels in both `from` and the body
    pub fn identify(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self::new(MessageType::Identify, identity.clone(), identity)
    }

    pub fn joined(identity: &str) -> Self {
        Self::new(
            MessageType::Joined,
            identity,
            format!("{} has joined the chatroom.", identity),
        )
    }

    pub fn left(identity: &str) -> Self {
        Self::new(
            MessageType::Left,
            identity,
            format!("{} has left the chatroom.", identity),
        )
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self::new(MessageType::System, SERVER_IDENTITY, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_match_from_wire() {
        for kind in [
            MessageType::Chat,
            MessageType::Identify,
            MessageType::Joined,
            MessageType::Left,
            MessageType::System,
        ] {
            assert_eq!(MessageType::from_wire(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(
            MessageType::from_wire("nickname"),
            Some(MessageType::Identify)
        );
        assert_eq!(MessageType::from_wire("other"), Some(MessageType::System));
        assert_eq!(MessageType::from_wire("CHAT"), None);
        assert_eq!(MessageType::from_wire(""), None);
    }

    #[test]
    fn test_server_only_types() {
        assert!(!MessageType::Chat.is_server_only());
        assert!(!MessageType::Identify.is_server_only());
        assert!(MessageType::Joined.is_server_only());
        assert!(MessageType::Left.is_server_only());
        assert!(MessageType::System.is_server_only());
    }

    #[test]
    fn test_announcement_constructors() {
        let joined = Message::joined("alice");
        assert_eq!(joined.kind, MessageType::Joined);
        assert_eq!(joined.from, "alice");
        assert_eq!(joined.body, "alice has joined the chatroom.");

        let left = Message::left("alice");
        assert_eq!(left.kind, MessageType::Left);
        assert_eq!(left.body, "alice has left the chatroom.");

        let identify = Message::identify("10.0.0.7");
        assert_eq!(identify.from, "10.0.0.7");
        assert_eq!(identify.body, "10.0.0.7");

        assert_eq!(Message::system("hello").from, SERVER_IDENTITY);
    }
}
