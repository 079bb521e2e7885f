//! Per-connection liveness state machine.
//!
//! ```text
//!          interval elapsed            Pong
//!   Idle ─────────────────► AwaitingPong ─────► Idle
//!                               │
//!                               │ timeout elapsed
//!                               ▼
//!                            TimedOut
//! ```
//!
//! The monitor never writes to the transport. The connection's command
//! loop asks it for the next deadline, calls [`HeartbeatMonitor::poll`]
//! when the deadline passes, and enqueues a Ping when told to.
//!
//! # Scheduling
//!
//! - Without an active transfer, the next Ping is due `interval` after the
//!   last activity in either direction, so data traffic defers it.
//! - With an active transfer, the next Ping is due `interval` after the
//!   previous Ping, so a transfer longer than `interval` still carries
//!   Pings at the normal cadence.
//! - `timeout` counts from the moment the Ping was issued and is not reset
//!   by data traffic.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// HeartbeatState
// ============================================================================

/// Liveness state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// No Ping outstanding.
    Idle,
    /// A Ping was issued and its Pong has not arrived.
    AwaitingPong {
        /// When the Ping was issued.
        since: Instant,
    },
    /// The Pong did not arrive in time.
    TimedOut,
}

// ============================================================================
// HeartbeatAction
// ============================================================================

/// What the command loop must do after [`HeartbeatMonitor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing is due yet.
    Wait,
    /// Enqueue a Ping frame.
    SendPing,
    /// Close the connection with a heartbeat timeout.
    TimedOut,
}

// ============================================================================
// HeartbeatStats
// ============================================================================

/// Heartbeat counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Pings issued.
    pub pings_sent: u64,
    /// Pongs received.
    pub pongs_received: u64,
    /// Round-trip time of the most recent exchange.
    pub last_rtt: Option<Duration>,
}

// ============================================================================
// HeartbeatMonitor
// ============================================================================

/// Heartbeat scheduler and timeout detector.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    /// Interval between Pings.
    interval: Duration,
    /// Maximum wait for a Pong.
    timeout: Duration,
    /// Current state.
    state: HeartbeatState,
    /// Last frame sent or received.
    last_activity: Instant,
    /// Last Ping issued (connection start before the first one).
    last_ping: Instant,
    /// Whether a payload transfer is in progress.
    transfer_active: bool,
    /// Counters.
    stats: HeartbeatStats,
}

impl HeartbeatMonitor {
    /// Creates a monitor in the Idle state.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            state: HeartbeatState::Idle,
            last_activity: now,
            last_ping: now,
            transfer_active: false,
            stats: HeartbeatStats::default(),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Returns the time of the last activity.
    #[inline]
    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Returns counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> HeartbeatStats {
        self.stats
    }

    /// Records a frame sent or received.
    #[inline]
    pub fn record_activity(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Marks whether a payload transfer is in progress.
    pub fn set_transfer_active(&mut self, active: bool) {
        if self.transfer_active != active {
            trace!(active, "Heartbeat transfer mode changed");
        }
        self.transfer_active = active;
    }

    /// Handles a Pong from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if no Ping is outstanding.
    pub fn on_pong(&mut self, now: Instant) -> Result<()> {
        match self.state {
            HeartbeatState::AwaitingPong { since } => {
                let rtt = now.saturating_duration_since(since);
                self.state = HeartbeatState::Idle;
                self.stats.pongs_received += 1;
                self.stats.last_rtt = Some(rtt);
                self.record_activity(now);
                trace!(rtt_ms = rtt.as_millis() as u64, "Pong received");
                Ok(())
            }
            HeartbeatState::Idle => {
                warn!("Pong received with no Ping outstanding");
                Err(Error::protocol("unexpected pong"))
            }
            HeartbeatState::TimedOut => Err(Error::heartbeat_timeout(self.timeout_ms())),
        }
    }

    /// Returns when the next Ping is due, ignoring the current state.
    #[must_use]
    pub fn next_ping_due(&self) -> Instant {
        let anchor = if self.transfer_active {
            self.last_ping
        } else {
            self.last_activity
        };
        anchor + self.interval
    }

    /// Returns the instant at which [`poll`](Self::poll) has work to do.
    ///
    /// `None` once timed out.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            HeartbeatState::Idle => Some(self.next_ping_due()),
            HeartbeatState::AwaitingPong { since } => Some(since + self.timeout),
            HeartbeatState::TimedOut => None,
        }
    }

    /// Advances the state machine to `now`.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        match self.state {
            HeartbeatState::Idle if now >= self.next_ping_due() => {
                self.state = HeartbeatState::AwaitingPong { since: now };
                self.last_ping = now;
                self.stats.pings_sent += 1;
                trace!(pings_sent = self.stats.pings_sent, "Ping due");
                HeartbeatAction::SendPing
            }
            HeartbeatState::AwaitingPong { since } if now >= since + self.timeout => {
                self.state = HeartbeatState::TimedOut;
                debug!(
                    timeout_ms = self.timeout_ms(),
                    pings_sent = self.stats.pings_sent,
                    "Heartbeat timed out"
                );
                HeartbeatAction::TimedOut
            }
            _ => HeartbeatAction::Wait,
        }
    }

    /// Returns the timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

// ============================================================================
// Tests
// ============================================================================
