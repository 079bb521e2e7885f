//! Fair scheduler for one connection's outbound stream.
//!
//! The multiplexer keeps two FIFO queues, one per [`FrameClass`]. Every
//! pull returns the head of the control queue if it is non-empty and
//! otherwise at most one data frame, so a control frame enqueued in the
//! middle of a transfer waits for at most one chunk transmission no matter
//! how large the payload is.
//!
//! ```text
//!   Control: [Ping] ───────────┐
//!                              ├──► pull_next() ──► TransportSender
//!   Data:    [D3][D4][D5] ─────┘   (control first, one data frame per pull)
//! ```
//!
//! When the transport reports backpressure the data queue is paused;
//! control frames remain eligible.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Frame, FrameClass};

// ============================================================================
// MultiplexerStats
// ============================================================================

/// Counters of frames emitted per class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    /// Control frames pulled.
    pub control_emitted: u64,
    /// Data frames pulled.
    pub data_emitted: u64,
    /// Data frames discarded by cancellation or close.
    pub data_discarded: u64,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Two-queue scheduler with control priority and a bounded data queue.
#[derive(Debug)]
pub struct Multiplexer {
    /// Pending control frames.
    control: VecDeque<Frame>,
    /// Pending data frames.
    data: VecDeque<Frame>,
    /// Maximum number of queued data frames.
    data_capacity: usize,
    /// Set while the transport is saturated.
    data_paused: bool,
    /// Emission counters.
    stats: MultiplexerStats,
}

impl Multiplexer {
    /// Creates a multiplexer whose data queue holds at most `data_capacity` frames.
    #[must_use]
    pub fn new(data_capacity: usize) -> Self {
        let data_capacity = data_capacity.max(1);
        Self {
            control: VecDeque::new(),
            data: VecDeque::with_capacity(data_capacity),
            data_capacity,
            data_paused: false,
            stats: MultiplexerStats::default(),
        }
    }

    /// Enqueues a frame in the given class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if a payload chunk is enqueued while the
    /// data queue is at capacity. A `Completed` marker always fits behind
    /// the chunks it terminates.
    pub fn enqueue(&mut self, frame: Frame, class: FrameClass) -> Result<()> {
        match class {
            FrameClass::Control => self.control.push_back(frame),
            FrameClass::Data => {
                if matches!(frame, Frame::Data(_)) && self.data.len() >= self.data_capacity {
                    return Err(Error::queue_full(self.data_capacity));
                }
                self.data.push_back(frame);
            }
        }
        Ok(())
    }

    /// Enqueues a frame in its natural class.
    ///
    /// # Errors
    ///
    /// See [`enqueue`](Self::enqueue).
    #[inline]
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        let class = frame.class();
        self.enqueue(frame, class)
    }

    /// Returns the next frame to transmit.
    ///
    /// Control frames always win; a data frame is returned only when the
    /// control queue is empty and data is not paused.
    pub fn pull_next(&mut self) -> Option<Frame> {
        if let Some(frame) = self.control.pop_front() {
            self.stats.control_emitted += 1;
            trace!(kind = frame.kind(), "Pulled control frame");
            return Some(frame);
        }

        if self.data_paused {
            return None;
        }

        let frame = self.data.pop_front()?;
        self.stats.data_emitted += 1;
        Some(frame)
    }

    /// Pauses or resumes the data queue.
    #[inline]
    pub fn set_data_paused(&mut self, paused: bool) {
        self.data_paused = paused;
    }

    /// Returns `true` while data is paused.
    #[inline]
    #[must_use]
    pub const fn is_data_paused(&self) -> bool {
        self.data_paused
    }

    /// Returns `true` if another data frame fits.
    #[inline]
    #[must_use]
    pub fn has_data_capacity(&self) -> bool {
        self.data.len() < self.data_capacity
    }

    /// Returns `true` if at least one data frame is queued.
    #[inline]
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Returns `true` if at least one control frame is queued.
    #[inline]
    #[must_use]
    pub fn has_control(&self) -> bool {
        !self.control.is_empty()
    }

    /// Returns `true` if a pull would yield a frame.
    #[inline]
    #[must_use]
    pub fn has_ready(&self) -> bool {
        self.has_control() || (!self.data_paused && self.has_data())
    }

    /// Returns the number of queued frames in a class.
    #[inline]
    #[must_use]
    pub fn len(&self, class: FrameClass) -> usize {
        match class {
            FrameClass::Control => self.control.len(),
            FrameClass::Data => self.data.len(),
        }
    }

    /// Returns `true` if both queues are empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.data.is_empty()
    }

    /// Drops every queued data frame of one request.
    ///
    /// Returns the number of frames dropped.
    pub fn cancel_request(&mut self, request_id: RequestId) -> usize {
        let before = self.data.len();
        self.data
            .retain(|frame| frame.data_request_id() != Some(request_id));
        let dropped = before - self.data.len();
        self.stats.data_discarded += dropped as u64;
        dropped
    }

    /// Drops every queued data frame.
    ///
    /// Returns the number of frames dropped.
    pub fn clear_data(&mut self) -> usize {
        let dropped = self.data.len();
        self.data.clear();
        self.stats.data_discarded += dropped as u64;
        dropped
    }

    /// Returns emission counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> MultiplexerStats {
        self.stats
    }
}

// ============================================================================
// Tests
// ============================================================================
