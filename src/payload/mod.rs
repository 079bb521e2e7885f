//! Chunked payload production.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PayloadRequest`] | Progress of one request |
//! | [`PayloadProducer`] | Lazy, seeded chunk iterator |
//! | [`ProducerWorker`] | Producer task behind a bounded channel |
//!
//! The full payload is never materialized; at most `capacity + 1` chunks
//! of a request exist at any time between producer and multiplexer.

// ============================================================================
// Submodules
// ============================================================================

/// Lazy, seeded payload generation.
pub mod producer;

/// Per-request bookkeeping.
pub mod request;

/// Producer task and cancellation.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use producer::PayloadProducer;
pub use request::{MIB, PayloadRequest, chunk_count};
pub use worker::ProducerWorker;
