//! Error types for hubstream.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use hubstream::{CloseReason, ConnectionId, ConnectionRegistry, Result};
//!
//! fn example(registry: &ConnectionRegistry, id: ConnectionId) -> Result<()> {
//!     let connection = registry.get(id)?;
//!     connection.close(CloseReason::Normal)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Connection |
//! |----------|----------|------------|
//! | Protocol | [`Error::Protocol`] | closed with diagnostic Close frame |
//! | Liveness | [`Error::HeartbeatTimeout`] | closed |
//! | Transport | [`Error::Transport`], [`Error::WebSocket`], [`Error::Io`] | closed immediately |
//! | Resource | [`Error::Resource`] | stays open, request rejected |
//! | Registry | [`Error::DuplicateId`], [`Error::ConnectionNotFound`] | n/a |
//! | Local | [`Error::Config`], [`Error::QueueFull`], [`Error::ConnectionClosed`], [`Error::Json`] | n/a |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when [`HubConfig`](crate::HubConfig) validation fails.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection-Terminating Errors
    // ========================================================================
    /// Malformed or out-of-order frame from the peer.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// No Pong arrived within the heartbeat timeout.
    #[error("Heartbeat timeout after {timeout_ms}ms")]
    HeartbeatTimeout {
        /// Milliseconds spent waiting for the Pong.
        timeout_ms: u64,
    },

    /// Underlying I/O failure of the transport.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Recoverable Errors
    // ========================================================================
    /// Requested payload exceeds a configured limit.
    #[error("Resource limit exceeded: {message}")]
    Resource {
        /// Which limit was hit.
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// A connection with this id is already registered.
    #[error("Duplicate connection id: {id}")]
    DuplicateId {
        /// The conflicting id.
        id: ConnectionId,
    },

    /// No connection with this id is registered.
    #[error("Connection not found: {id}")]
    ConnectionNotFound {
        /// The missing id.
        id: ConnectionId,
    },

    /// The connection's command loop has already exited.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// The bounded data queue has no room for another frame.
    #[error("Data queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a heartbeat timeout error.
    #[inline]
    pub fn heartbeat_timeout(timeout_ms: u64) -> Self {
        Self::HeartbeatTimeout { timeout_ms }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a resource error.
    #[inline]
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Creates a duplicate id error.
    #[inline]
    pub fn duplicate_id(id: ConnectionId) -> Self {
        Self::DuplicateId { id }
    }

    /// Creates a connection not found error.
    #[inline]
    pub fn connection_not_found(id: ConnectionId) -> Self {
        Self::ConnectionNotFound { id }
    }

    /// Creates a queue full error.
    #[inline]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error is a transport failure.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Only resource errors leave the connection open; the offending
    /// request is rejected and the client may issue another.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    /// Returns `true` if this error terminates the connection it occurred on.
    #[inline]
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::HeartbeatTimeout { .. } | Self::Json(_)
        ) || self.is_transport_error()
    }
}

// ============================================================================
// Tests
// ============================================================================
