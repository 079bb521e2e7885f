//! Hub listener and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`HubConfig`] limits, timings and builder |
//! | `core` | [`Hub`] TCP/WebSocket listener |

// ============================================================================
// Submodules
// ============================================================================

/// Hub configuration.
pub mod config;

/// Hub listener and accept loop.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::HubConfig;
pub use core::Hub;
