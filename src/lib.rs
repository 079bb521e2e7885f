//! hubstream - WebSocket hub that streams large payloads without starving
//! heartbeats.
//!
//! Clients connect over a persistent WebSocket, ask for large generated
//! payloads and receive them as a sequence of binary chunks, while the
//! server keeps exchanging liveness Pings and Pongs on the same connection.
//!
//! # Architecture
//!
//! Each connection runs one command loop that is the only writer to its
//! transport:
//!
//! - **[`PayloadProducer`]**: lazy, seeded sequence of fixed-size chunks
//! - **[`Multiplexer`]**: control frames first, at most one data frame per pull
//! - **[`HeartbeatMonitor`]**: schedules Pings and detects a missing Pong
//! - **[`TransportSender`]**: hands frames to the socket and reports backpressure
//! - **[`ConnectionRegistry`]**: the only state shared across connections
//!
//! A control frame enqueued during a transfer waits for at most one chunk
//! transmission, so a Ping is never starved by a large payload.
//!
//! # Quick Start
//!
//! ```no_run
//! use hubstream::{Hub, HubConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let hub = Hub::bind(HubConfig::new().with_chunk_size(16 * 1024)).await?;
//!     println!("Serving on {}", hub.ws_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Registry, heartbeat, multiplexer and command loop |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hub`] | [`Hub`] listener and [`HubConfig`] |
//! | [`identifiers`] | Connection and request ids |
//! | [`payload`] | Payload production and producer tasks |
//! | [`protocol`] | Frames, client messages and wire encoding |
//! | [`transport`] | Frame handoff and socket tasks |

// ============================================================================
// Modules
// ============================================================================

/// Connection core.
///
/// - [`Connection`] - Handle to one client connection
/// - [`ConnectionRegistry`] - Live connections
/// - [`ConnectionActor`] - Per-connection command loop
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Hub listener and configuration.
pub mod hub;

/// Type-safe identifiers.
pub mod identifiers;

/// Chunked payload production.
pub mod payload;

/// Frames and client messages.
pub mod protocol;

/// Transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    Connection, ConnectionActor, ConnectionRegistry, ConnectionState, HeartbeatAction,
    HeartbeatMonitor, HeartbeatState, LifecycleEvent, Multiplexer,
};

// Error types
pub use error::{Error, Result};

// Hub types
pub use hub::{Hub, HubConfig};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};

// Payload types
pub use payload::{MIB, PayloadProducer, PayloadRequest, ProducerWorker};

// Protocol types
pub use protocol::{ClientMessage, CloseReason, DataChunk, Frame, FrameClass, Inbound};

// Transport types
pub use transport::{SendOutcome, TransportSender, TransportSink};
