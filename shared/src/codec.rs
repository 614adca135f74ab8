//! Message codec: one JSON object per line
//!
//! A frame is `{"type": ..., "from": ..., "message": ...}` followed by a
//! single `\n`. JSON string escaping turns any line-feed inside a field into
//! `\n`, so an encoded frame never contains the delimiter except at its end.

use crate::{Message, MessageType};
use serde::Deserialize;
use thiserror::Error;

/// Byte that terminates every frame on the wire
pub const FRAME_DELIMITER: u8 = b'\n';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
}

impl CodecError {
    /// Unknown types are well-formed frames from a newer peer and are
    /// ignored without complaint
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, CodecError::UnknownType(_))
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    from: String,
    message: String,
}

/// Encodes a message into a delimiter-terminated frame
pub fn encode(message: &Message) -> Result<String, CodecError> {
    let mut frame = serde_json::to_string(message).map_err(CodecError::Encode)?;
    frame.push(FRAME_DELIMITER as char);
    Ok(frame)
}

/// Decodes one frame with its delimiter already stripped
///
/// A trailing delimiter (and a `\r` before it) is tolerated so that frames
/// typed by hand over a raw socket still decode.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    let frame = frame.strip_suffix(b"\n").unwrap_or(frame);
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);

    let raw: RawFrame = serde_json::from_slice(frame).map_err(CodecError::Malformed)?;
    let kind = MessageType::from_wire(&raw.kind).ok_or(CodecError::UnknownType(raw.kind))?;

    Ok(Message {
        kind,
        from: raw.from,
        body: raw.message,
    })
}
