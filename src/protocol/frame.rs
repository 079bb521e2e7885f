//! Outbound frame types.
//!
//! A [`Frame`] is the atomic unit handed to the transport. Every frame
//! belongs to a [`FrameClass`]; the multiplexer keeps one FIFO queue per
//! class and always prefers control traffic.
//!
//! | Variant | Class | Wire |
//! |---------|-------|------|
//! | `Ping`, `Pong` | Control | JSON text |
//! | `Accepted`, `Rejected`, `Cancelled` | Control | JSON text |
//! | `Close` | Control | JSON text, then WebSocket close |
//! | `Data` | Data | binary |
//! | `Completed` | Data | JSON text |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Accounting weight of a control frame in the transport buffer.
const CONTROL_FRAME_WEIGHT: usize = 64;

/// Length of the binary header preceding data chunk bytes.
pub const DATA_HEADER_LEN: usize = 1 + 8 + 8;

// ============================================================================
// FrameClass
// ============================================================================

/// Scheduling class of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameClass {
    /// Liveness and protocol replies; never waits behind data.
    Control,
    /// Payload chunks and their completion marker.
    Data,
}

// ============================================================================
// DataChunk
// ============================================================================

/// One slice of a payload.
#[derive(Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Request this chunk belongs to.
    pub request_id: RequestId,
    /// Zero-based position of the chunk within its request.
    pub seq: u64,
    /// Chunk bytes.
    pub bytes: Vec<u8>,
}

impl DataChunk {
    /// Returns the number of payload bytes in the chunk.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the chunk carries no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChunk")
            .field("request_id", &self.request_id)
            .field("seq", &self.seq)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum CloseReason {
    /// Orderly close requested by either side.
    Normal,
    /// The peer sent a malformed or out-of-order frame.
    ProtocolError(String),
    /// No Pong arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// The underlying transport failed.
    TransportError(String),
    /// The hub is shutting down.
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::ProtocolError(message) => write!(f, "protocol error: {message}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::TransportError(message) => write!(f, "transport error: {message}"),
            Self::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A frame on a connection's outbound stream.
///
/// Control variants serialize as JSON objects tagged by `type`;
/// [`Frame::Data`] is encoded in binary by [`wire`](super::wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Liveness probe.
    Ping,

    /// Liveness reply.
    Pong,

    /// Payload chunk.
    #[serde(skip)]
    Data(DataChunk),

    /// A payload request was accepted and streaming will follow.
    #[serde(rename_all = "camelCase")]
    Accepted {
        /// Client-chosen invocation id being answered.
        invocation_id: u64,
        /// Server-assigned request id carried by the data frames.
        request_id: RequestId,
        /// Total payload size in bytes.
        total_bytes: u64,
        /// Number of data frames that will follow.
        chunk_count: u64,
    },

    /// A payload request was rejected; the connection stays open.
    #[serde(rename_all = "camelCase")]
    Rejected {
        /// Client-chosen invocation id being answered.
        invocation_id: u64,
        /// Human-readable reason.
        error: String,
    },

    /// All chunks of a request were sent.
    #[serde(rename_all = "camelCase")]
    Completed {
        /// The finished request.
        request_id: RequestId,
        /// Number of data frames sent.
        chunks: u64,
        /// Number of payload bytes sent.
        bytes: u64,
    },

    /// A request was cancelled before completion.
    #[serde(rename_all = "camelCase")]
    Cancelled {
        /// The cancelled request.
        request_id: RequestId,
    },

    /// Final frame on a connection.
    Close {
        /// Why the connection is closing.
        reason: CloseReason,
    },
}

impl Frame {
    /// Returns the scheduling class of this frame.
    #[inline]
    #[must_use]
    pub fn class(&self) -> FrameClass {
        match self {
            Self::Data(_) | Self::Completed { .. } => FrameClass::Data,
            _ => FrameClass::Control,
        }
    }

    /// Returns `true` for control frames.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.class() == FrameClass::Control
    }

    /// Returns the request id for frames that belong to a request's data stream.
    #[inline]
    #[must_use]
    pub fn data_request_id(&self) -> Option<RequestId> {
        match self {
            Self::Data(chunk) => Some(chunk.request_id),
            Self::Completed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Returns the number of bytes this frame occupies in the transport buffer.
    #[inline]
    #[must_use]
    pub fn weight(&self) -> usize {
        match self {
            Self::Data(chunk) => DATA_HEADER_LEN + chunk.len(),
            _ => CONTROL_FRAME_WEIGHT,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Data(_) => "data",
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Completed { .. } => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::Close { .. } => "close",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Frame {
        Frame::Data(DataChunk {
            request_id: RequestId::new(1),
            seq: 0,
            bytes: vec![b'a'; len],
        })
    }

    #[test]
    fn test_classes() {
        assert_eq!(Frame::Ping.class(), FrameClass::Control);
        assert_eq!(Frame::Pong.class(), FrameClass::Control);
        assert_eq!(
            Frame::Close {
                reason: CloseReason::Normal
            }
            .class(),
            FrameClass::Control
        );
        assert_eq!(chunk(4).class(), FrameClass::Data);
        assert_eq!(
            Frame::Completed {
                request_id: RequestId::new(1),
                chunks: 0,
                bytes: 0
            }
            .class(),
            FrameClass::Data
        );
    }

    #[test]
    fn test_weight_counts_payload() {
        assert_eq!(chunk(100).weight(), DATA_HEADER_LEN + 100);
        assert_eq!(Frame::Ping.weight(), CONTROL_FRAME_WEIGHT);
    }

    #[test]
    fn test_control_serialization() {
        let json = serde_json::to_string(&Frame::Ping).expect("serialize");
        assert_eq!(json, r#"{"type":"ping"}"#);

        let frame = Frame::Accepted {
            invocation_id: 3,
            request_id: RequestId::new(1),
            total_bytes: 1024,
            chunk_count: 1,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert!(json.contains(r#""type":"accepted""#));
        assert!(json.contains(r#""invocationId":3"#));
        assert!(json.contains(r#""chunkCount":1"#));
    }

    #[test]
    fn test_close_reason_serialization() {
        let frame = Frame::Close {
            reason: CloseReason::ProtocolError("unexpected pong".into()),
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: Frame = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, frame);

        let json = serde_json::to_string(&CloseReason::HeartbeatTimeout).expect("serialize");
        assert_eq!(json, r#"{"kind":"heartbeatTimeout"}"#);
    }

    #[test]
    fn test_data_chunk_debug_hides_bytes() {
        let debug = format!("{:?}", chunk(3));
        assert!(debug.contains("len: 3"));
        assert!(!debug.contains("97"));
    }
}
