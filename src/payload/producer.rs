//! Lazy, seeded payload generation.
//!
//! A [`PayloadProducer`] yields the chunks of one request on demand.
//! Nothing beyond the chunk currently being produced is held in memory.
//!
//! # Example
//!
//! ```ignore
//! use hubstream::{PayloadProducer, RequestId};
//!
//! let producer = PayloadProducer::start(RequestId::new(1), 40_000, 16_384, 7)?;
//! let sizes: Vec<usize> = producer.map(|chunk| chunk.len()).collect();
//! assert_eq!(sizes, [16_384, 16_384, 7_232]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::DataChunk;

use super::request::{MIB, chunk_count};

// ============================================================================
// Constants
// ============================================================================

/// Lowest printable ASCII byte (space).
const PRINTABLE_FIRST: u8 = 32;

/// Number of printable ASCII bytes (32..=126).
const PRINTABLE_SPAN: u8 = 95;

// ============================================================================
// PayloadProducer
// ============================================================================

/// Deterministic chunk generator for one request.
///
/// The same `(total_bytes, chunk_size, seed)` always yields the same bytes.
#[derive(Debug, Clone)]
pub struct PayloadProducer {
    /// Request the chunks belong to.
    request_id: RequestId,
    /// Total payload size.
    total_bytes: u64,
    /// Size of every chunk except possibly the last.
    chunk_size: usize,
    /// Seed the generator was started with.
    seed: u64,
    /// Byte generator.
    rng: StdRng,
    /// Sequence number of the next chunk.
    next_seq: u64,
    /// Bytes produced so far.
    produced: u64,
    /// Set by [`cancel`](Self::cancel).
    cancelled: bool,
}

impl PayloadProducer {
    /// Starts a producer for one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `chunk_size` is zero.
    pub fn start(
        request_id: RequestId,
        total_bytes: u64,
        chunk_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }

        Ok(Self {
            request_id,
            total_bytes,
            chunk_size,
            seed,
            rng: StdRng::seed_from_u64(seed),
            next_seq: 0,
            produced: 0,
            cancelled: false,
        })
    }

    /// Returns the request id.
    #[inline]
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the total payload size.
    #[inline]
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Returns the number of chunks a full run yields.
    #[inline]
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        chunk_count(self.total_bytes, self.chunk_size)
    }

    /// Returns bytes produced so far.
    #[inline]
    #[must_use]
    pub const fn produced(&self) -> u64 {
        self.produced
    }

    /// Returns `true` if no further chunk will be produced.
    #[inline]
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.cancelled || self.produced >= self.total_bytes
    }

    /// Rewinds to the first chunk with the original seed.
    pub fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.next_seq = 0;
        self.produced = 0;
        self.cancelled = false;
    }

    /// Stops production; subsequent calls to `next` return `None`.
    pub fn cancel(&mut self) {
        if !self.cancelled {
            debug!(
                request_id = %self.request_id,
                produced = self.produced,
                "Payload producer cancelled"
            );
        }
        self.cancelled = true;
    }

    /// Fills `buf` with printable ASCII.
    fn fill_printable(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
        for byte in buf.iter_mut() {
            *byte = PRINTABLE_FIRST + *byte % PRINTABLE_SPAN;
        }
    }
}

impl Iterator for PayloadProducer {
    type Item = DataChunk;

    fn next(&mut self) -> Option<DataChunk> {
        if self.is_finished() {
            return None;
        }

        let remaining = self.total_bytes - self.produced;
        let len = remaining.min(self.chunk_size as u64) as usize;

        let mut bytes = vec![0u8; len];
        self.fill_printable(&mut bytes);

        let before = self.produced;
        self.produced += len as u64;

        let chunk = DataChunk {
            request_id: self.request_id,
            seq: self.next_seq,
            bytes,
        };
        self.next_seq += 1;

        trace!(request_id = %self.request_id, seq = chunk.seq, len, "Chunk produced");
        if self.produced / MIB > before / MIB {
            debug!(
                request_id = %self.request_id,
                produced_mb = self.produced / MIB,
                total_mb = self.total_bytes / MIB,
                "Payload generation progress"
            );
        }

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.is_finished() {
            return (0, Some(0));
        }
        let left = (self.chunk_count() - self.next_seq) as usize;
        (left, Some(left))
    }
}

// ============================================================================
// Tests
// ============================================================================
