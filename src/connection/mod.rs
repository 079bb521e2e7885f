//! Connection core.
//!
//! Everything that happens on one connection after the WebSocket upgrade
//! lives here: lifecycle tracking, liveness, outbound scheduling and the
//! command loop that ties them together.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `actor` | Per-connection command loop, the single transport writer |
//! | `handle` | [`Connection`] handle and [`ConnectionState`] |
//! | `heartbeat` | [`HeartbeatMonitor`] liveness state machine |
//! | `multiplexer` | [`Multiplexer`] control/data scheduler |
//! | `registry` | [`ConnectionRegistry`] of live connections |

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection command loop.
pub mod actor;

/// Connection handle and lifecycle state.
pub mod handle;

/// Heartbeat scheduling and timeout detection.
pub mod heartbeat;

/// Control-priority frame scheduler.
pub mod multiplexer;

/// Live connection tracking.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use actor::ConnectionActor;
pub use handle::{Connection, ConnectionState};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor, HeartbeatState, HeartbeatStats};
pub use multiplexer::{Multiplexer, MultiplexerStats};
pub use registry::{ConnectionRegistry, LifecycleEvent};
