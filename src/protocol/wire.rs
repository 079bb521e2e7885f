//! Mapping between frames and WebSocket messages.
//!
//! Control frames travel as JSON text. Data frames travel as binary
//! messages with a fixed 17-byte header:
//!
//! ```text
//! ┌──────┬────────────────────┬────────────────────┬──────────────┐
//! │ 0x01 │ request id (u64 BE)│ chunk seq (u64 BE) │ chunk bytes… │
//! └──────┴────────────────────┴────────────────────┴──────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{from_str, to_string};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::frame::{CloseReason, DATA_HEADER_LEN, DataChunk, Frame};
use super::message::{ClientMessage, Inbound};

// ============================================================================
// Constants
// ============================================================================

/// First byte of every binary data message.
pub const DATA_TAG: u8 = 0x01;

/// Application close code used for heartbeat timeouts.
const HEARTBEAT_TIMEOUT_CODE: u16 = 4000;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a frame as a WebSocket message.
///
/// # Errors
///
/// Returns [`Error::Json`] if a control frame fails to serialize.
pub fn encode(frame: Frame) -> Result<Message> {
    match frame {
        Frame::Data(chunk) => Ok(Message::Binary(encode_data(&chunk).into())),
        other => Ok(Message::Text(to_string(&other)?.into())),
    }
}

/// Encodes a data chunk into its binary representation.
#[must_use]
pub fn encode_data(chunk: &DataChunk) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATA_HEADER_LEN + chunk.bytes.len());
    buf.push(DATA_TAG);
    buf.extend_from_slice(&chunk.request_id.as_u64().to_be_bytes());
    buf.extend_from_slice(&chunk.seq.to_be_bytes());
    buf.extend_from_slice(&chunk.bytes);
    buf
}

/// Builds the WebSocket close message that follows a Close frame.
#[must_use]
pub fn close_message(reason: &CloseReason) -> Message {
    let code = match reason {
        CloseReason::Normal => CloseCode::Normal,
        CloseReason::ProtocolError(_) => CloseCode::Protocol,
        CloseReason::HeartbeatTimeout => CloseCode::Library(HEARTBEAT_TIMEOUT_CODE),
        CloseReason::TransportError(_) => CloseCode::Error,
        CloseReason::ServerShutdown => CloseCode::Away,
    };

    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a message received from a client.
///
/// Returns `None` for WebSocket-level control messages that the
/// WebSocket layer answers by itself.
#[must_use]
pub fn decode_client(message: &Message) -> Option<Inbound> {
    match message {
        Message::Text(text) => Some(match from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Malformed(format!("invalid client message: {e}")),
        }),
        Message::Binary(_) => Some(Inbound::Malformed(
            "binary messages are not accepted from clients".to_string(),
        )),
        Message::Close(_) => Some(Inbound::Message(ClientMessage::Close)),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

/// Decodes a message received from the server.
///
/// Returns `Ok(None)` for WebSocket-level control messages.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for a truncated or mistagged data message
/// and [`Error::Json`] for unparsable text.
pub fn decode_server(message: &Message) -> Result<Option<Frame>> {
    match message {
        Message::Text(text) => Ok(Some(from_str::<Frame>(text.as_str())?)),
        Message::Binary(bytes) => decode_data(bytes).map(|chunk| Some(Frame::Data(chunk))),
        _ => Ok(None),
    }
}

/// Decodes a binary data message.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the header is missing or mistagged.
pub fn decode_data(bytes: &[u8]) -> Result<DataChunk> {
    if bytes.len() < DATA_HEADER_LEN {
        return Err(Error::protocol(format!(
            "data message too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != DATA_TAG {
        return Err(Error::protocol(format!("unknown data tag: {:#04x}", bytes[0])));
    }

    let (request_id, rest) = bytes[1..].split_at(8);
    let (seq, payload) = rest.split_at(8);

    Ok(DataChunk {
        request_id: RequestId::new(u64::from_be_bytes(read_u64(request_id))),
        seq: u64::from_be_bytes(read_u64(seq)),
        bytes: payload.to_vec(),
    })
}

/// Copies an 8-byte slice into an array.
fn read_u64(slice: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(slice);
    out
}

// ============================================================================
// Tests
// ============================================================================
