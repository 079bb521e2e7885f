//! Bookkeeping for one payload request.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Bytes per MiB; request sizes are expressed in MiB on the wire.
pub const MIB: u64 = 1024 * 1024;

// ============================================================================
// PayloadRequest
// ============================================================================

/// Progress of one payload request.
///
/// `bytes_emitted` counts bytes handed to the multiplexer and never
/// exceeds `total_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRequest {
    /// Request identity.
    pub request_id: RequestId,
    /// Total payload size in bytes.
    pub total_bytes: u64,
    /// Size of every chunk except possibly the last.
    pub chunk_size: usize,
    /// Bytes handed to the multiplexer so far.
    pub bytes_emitted: u64,
}

impl PayloadRequest {
    /// Creates a request with nothing emitted yet.
    #[inline]
    #[must_use]
    pub const fn new(request_id: RequestId, total_bytes: u64, chunk_size: usize) -> Self {
        Self {
            request_id,
            total_bytes,
            chunk_size,
            bytes_emitted: 0,
        }
    }

    /// Number of chunks a full transfer produces.
    #[inline]
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        chunk_count(self.total_bytes, self.chunk_size)
    }

    /// Bytes still to be emitted.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.total_bytes - self.bytes_emitted
    }

    /// Returns `true` once every byte was emitted.
    #[inline]
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_emitted >= self.total_bytes
    }

    /// Records `len` more bytes as emitted, clamped to the total.
    #[inline]
    pub fn record(&mut self, len: usize) {
        self.bytes_emitted = (self.bytes_emitted + len as u64).min(self.total_bytes);
    }
}

/// Number of chunks of `chunk_size` needed for `total_bytes`.
#[inline]
#[must_use]
pub const fn chunk_count(total_bytes: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_bytes.div_ceil(chunk_size as u64)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 16), 0);
        assert_eq!(chunk_count(16, 16), 1);
        assert_eq!(chunk_count(17, 16), 2);
        assert_eq!(chunk_count(50 * MIB, 16 * 1024), 3200);
    }

    #[test]
    fn test_record_clamps_to_total() {
        let mut request = PayloadRequest::new(RequestId::new(1), 10, 4);
        request.record(4);
        request.record(4);
        assert_eq!(request.remaining(), 2);
        assert!(!request.is_complete());

        request.record(4);
        assert_eq!(request.bytes_emitted, 10);
        assert!(request.is_complete());
    }

    #[test]
    fn test_empty_request_is_complete() {
        let request = PayloadRequest::new(RequestId::new(1), 0, 4);
        assert!(request.is_complete());
        assert_eq!(request.chunk_count(), 0);
    }
}
