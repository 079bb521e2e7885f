//! Client-to-server message types.
//!
//! # Format
//!
//! ```json
//! { "type": "ping" }
//! { "type": "pong" }
//! { "type": "requestLargeData", "invocationId": 1, "sizeMb": 50 }
//! { "type": "cancel", "requestId": 1 }
//! { "type": "close" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::RequestId;

// ============================================================================
// ClientMessage
// ============================================================================

/// A message received from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Client-initiated liveness probe; answered with a Pong.
    Ping,

    /// Reply to a server Ping.
    Pong,

    /// Ask the server to stream `size_mb` MiB of generated data.
    #[serde(rename_all = "camelCase")]
    RequestLargeData {
        /// Client-chosen id echoed in the `accepted`/`rejected` reply.
        invocation_id: u64,
        /// Requested size in MiB.
        size_mb: u32,
    },

    /// Stop an in-flight request.
    #[serde(rename_all = "camelCase")]
    Cancel {
        /// Request to cancel.
        request_id: RequestId,
    },

    /// Orderly close.
    Close,
}

impl ClientMessage {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::RequestLargeData { .. } => "requestLargeData",
            Self::Cancel { .. } => "cancel",
            Self::Close => "close",
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// What the socket reader hands to a connection's command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed client message.
    Message(ClientMessage),
    /// Something arrived that is not a valid client message.
    Malformed(String),
    /// The transport failed or ended without a close handshake.
    TransportError(String),
}

// ============================================================================
// Tests
// ============================================================================
