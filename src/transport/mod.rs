//! Transport layer.
//!
//! This module moves frames between a connection's command loop and the
//! socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   TransportSender     ┌──────────────┐
//! │ Connection command   │ ───── pipe ─────────► │ writer task  │──► WebSocket
//! │ loop (single writer) │   (single slot)       └──────────────┘
//! │                      │                        ┌──────────────┐
//! │                      │ ◄──── Inbound ─────── │ reader task  │◄── WebSocket
//! └──────────────────────┘   (bounded channel)   └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `sender` | [`TransportSender`], [`TransportSink`] and backpressure |
//! | `websocket` | Socket reader and writer tasks |

// ============================================================================
// Submodules
// ============================================================================

/// Frame handoff and backpressure.
pub mod sender;

/// WebSocket reader and writer tasks.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use sender::{SendOutcome, TransportSender, TransportSink, pipe};
pub use websocket::SocketTasks;
