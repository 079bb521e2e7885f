//! Wire protocol types.
//!
//! This module defines what travels over a hub connection.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`ClientMessage`] | Client → Server | Pong, requests, cancel, close |
//! | [`Frame`] (control) | Server → Client | Ping, replies, close |
//! | [`Frame::Data`] | Server → Client | Payload chunk (binary) |
//!
//! Ping and Pong are protocol-internal; application callers only see
//! requests, data and completions.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Outbound frames and scheduling classes |
//! | `message` | Inbound client messages |
//! | `wire` | WebSocket encoding and decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound frame types.
pub mod frame;

/// Client-to-server messages.
pub mod message;

/// WebSocket encoding and decoding.
pub mod wire;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{CloseReason, DataChunk, Frame, FrameClass};
pub use message::{ClientMessage, Inbound};
