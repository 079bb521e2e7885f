//! Frame handoff between a connection's command loop and its socket writer.
//!
//! [`pipe`] creates a single-slot link: the command loop owns the
//! [`TransportSender`], the socket writer task (or a test peer) owns the
//! [`TransportSink`].
//!
//! # Flow Control
//!
//! Two signals flow back to the command loop:
//!
//! | Signal | Cause | Effect |
//! |--------|-------|--------|
//! | `WouldBlock` | link slot occupied | frame kept as the single pending frame |
//! | saturated | a data frame is handed over but not yet written | multiplexer pauses data, control still flows |
//!
//! At most one data frame is ever ahead of a control frame the multiplexer
//! releases. The sender never holds more than one pending frame; everything
//! else waits in the multiplexer's bounded data queue.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameClass};

// ============================================================================
// SendOutcome
// ============================================================================

/// Result of handing one frame to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was accepted.
    Sent,
    /// The link is full; the frame is pending and will be retried by
    /// [`TransportSender::writable`].
    WouldBlock,
}

// ============================================================================
// FlowState
// ============================================================================

/// Accounting shared by both ends of a pipe.
#[derive(Debug, Default)]
struct FlowState {
    /// Bytes handed over but not yet written.
    in_flight: AtomicUsize,
    /// Data frames handed over but not yet written.
    data_in_flight: AtomicUsize,
    /// Signalled after every completed write.
    drained: Notify,
}

impl FlowState {
    fn acquire(&self, ticket: Ticket) {
        self.in_flight.fetch_add(ticket.weight, Ordering::AcqRel);
        if ticket.data {
            self.data_in_flight.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn release(&self, ticket: Ticket) {
        self.in_flight.fetch_sub(ticket.weight, Ordering::AcqRel);
        if ticket.data {
            self.data_in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// What one frame holds against the flow state until it is written.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    weight: usize,
    data: bool,
}

impl Ticket {
    fn of(frame: &Frame) -> Self {
        Self {
            weight: frame.weight(),
            data: frame.class() == FrameClass::Data,
        }
    }
}

// ============================================================================
// pipe
// ============================================================================

/// Creates a sender/sink pair joined by a single-slot link.
#[must_use]
pub fn pipe() -> (TransportSender, TransportSink) {
    let (tx, rx) = mpsc::channel(1);
    let flow = Arc::new(FlowState::default());

    let sender = TransportSender {
        tx,
        flow: Arc::clone(&flow),
        pending: None,
    };
    let sink = TransportSink {
        rx,
        flow,
        writing: None,
    };

    (sender, sink)
}

// ============================================================================
// TransportSender
// ============================================================================

/// Command-loop side of a pipe.
#[derive(Debug)]
pub struct TransportSender {
    /// Link to the writer.
    tx: mpsc::Sender<Frame>,
    /// Shared accounting.
    flow: Arc<FlowState>,
    /// Frame refused by a full link.
    pending: Option<Frame>,
}

impl TransportSender {
    /// Hands a frame to the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the writer has gone away
    /// - [`Error::QueueFull`] if a frame is already pending
    pub fn send(&mut self, frame: Frame) -> Result<SendOutcome> {
        if self.pending.is_some() {
            return Err(Error::queue_full(1));
        }

        let ticket = Ticket::of(&frame);
        self.flow.acquire(ticket);

        match self.tx.try_send(frame) {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(TrySendError::Full(frame)) => {
                trace!(kind = frame.kind(), "Transport full, frame pending");
                self.pending = Some(frame);
                Ok(SendOutcome::WouldBlock)
            }
            Err(TrySendError::Closed(_)) => {
                self.flow.release(ticket);
                Err(Error::transport("transport writer closed"))
            }
        }
    }

    /// Waits until the transport can make progress.
    ///
    /// With a pending frame, waits for the slot and hands it over.
    /// Otherwise waits until no data frame is left unwritten.
    /// Cancel safe: a pending frame is not lost if the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the writer has gone away.
    pub async fn writable(&mut self) -> Result<()> {
        if self.pending.is_some() {
            let permit = self
                .tx
                .reserve()
                .await
                .map_err(|_| Error::transport("transport writer closed"))?;
            if let Some(frame) = self.pending.take() {
                trace!(kind = frame.kind(), "Pending frame flushed");
                permit.send(frame);
            }
            return Ok(());
        }

        loop {
            let drained = self.flow.drained.notified();
            if !self.is_saturated() {
                return Ok(());
            }
            if self.tx.is_closed() {
                return Err(Error::transport("transport writer closed"));
            }
            drained.await;
        }
    }

    /// Returns `true` while a frame is pending.
    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns `true` while a data frame is handed over but not yet written.
    #[inline]
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.flow.data_in_flight.load(Ordering::Acquire) > 0
    }

    /// Returns unwritten bytes.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flow.in_flight.load(Ordering::Acquire)
    }

    /// Returns `true` if the writer has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// TransportSink
// ============================================================================

/// Writer side of a pipe.
///
/// The writer receives one frame, writes it, then calls
/// [`complete`](Self::complete). Until then the frame still counts as
/// unwritten.
#[derive(Debug)]
pub struct TransportSink {
    /// Link from the command loop.
    rx: mpsc::Receiver<Frame>,
    /// Shared accounting.
    flow: Arc<FlowState>,
    /// Frame received but not yet completed.
    writing: Option<Ticket>,
}

impl TransportSink {
    /// Receives the next frame to write, or `None` once the sender is gone.
    ///
    /// A frame received earlier and not yet completed is completed first.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.complete();
        let frame = self.rx.recv().await?;
        self.writing = Some(Ticket::of(&frame));
        Some(frame)
    }

    /// Receives a frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.complete();
        let frame = self.rx.try_recv().ok()?;
        self.writing = Some(Ticket::of(&frame));
        Some(frame)
    }

    /// Marks the frame last received as written.
    pub fn complete(&mut self) {
        if let Some(ticket) = self.writing.take() {
            self.flow.release(ticket);
            self.flow.drained.notify_waiters();
        }
    }

    /// Returns unwritten bytes.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flow.in_flight.load(Ordering::Acquire)
    }
}

impl Drop for TransportSink {
    fn drop(&mut self) {
        self.rx.close();
        self.flow.drained.notify_waiters();
    }
}

// ============================================================================
// Tests
// ============================================================================
