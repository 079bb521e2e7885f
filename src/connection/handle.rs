//! Connection handle and lifecycle state.
//!
//! A [`Connection`] is a cheap, cloneable handle. The mutable core of a
//! connection (multiplexer, heartbeat, transfers) lives in its command
//! loop; the handle exposes a snapshot of that state and the ability to
//! post commands into the loop.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::payload::PayloadRequest;
use crate::protocol::CloseReason;

// ============================================================================
// Constants
// ============================================================================

/// Commands buffered per connection.
const COMMAND_BUFFER: usize = 8;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
///
/// ```text
/// Connecting ──► Open ──► Draining ──► Closed
///                  │                     ▲
///                  └─────────────────────┘  heartbeat timeout / transport error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Registered, command loop not yet running.
    Connecting,
    /// Accepting requests.
    Open,
    /// Close requested; remaining control frames are flushed.
    Draining,
    /// Terminated.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Commands posted into a connection's command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionCommand {
    /// Close the connection.
    Close(CloseReason),
}

// ============================================================================
// Shared State
// ============================================================================

/// State published by the command loop.
#[derive(Debug)]
struct Shared {
    /// Lifecycle state.
    state: watch::Sender<ConnectionState>,
    /// Last frame sent or received.
    last_activity: Mutex<Instant>,
    /// Requests in flight.
    requests: Mutex<Vec<PayloadRequest>>,
    /// Why the connection closed.
    close_reason: Mutex<Option<CloseReason>>,
    /// Receiving end of the command channel until the loop claims it.
    commands: Mutex<Option<mpsc::Receiver<ConnectionCommand>>>,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one client connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`; clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    /// Connection identity.
    id: ConnectionId,
    /// Channel into the command loop.
    command_tx: mpsc::Sender<ConnectionCommand>,
    /// Published state.
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a handle in the `Connecting` state.
    pub(crate) fn new(id: ConnectionId) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Self {
            id,
            command_tx,
            shared: Arc::new(Shared {
                state,
                last_activity: Mutex::new(Instant::now()),
                requests: Mutex::new(Vec::new()),
                close_reason: Mutex::new(None),
                commands: Mutex::new(Some(command_rx)),
            }),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while the connection accepts requests.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the time of the last frame sent or received.
    #[inline]
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock()
    }

    /// Returns the requests in flight.
    #[must_use]
    pub fn active_requests(&self) -> Vec<PayloadRequest> {
        self.shared.requests.lock().clone()
    }

    /// Returns the oldest request in flight.
    #[must_use]
    pub fn active_request(&self) -> Option<PayloadRequest> {
        self.shared.requests.lock().first().copied()
    }

    /// Returns why the connection closed, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.lock().clone()
    }

    /// Asks the command loop to close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the loop has already exited.
    pub fn close(&self, reason: CloseReason) -> Result<()> {
        match self.command_tx.try_send(ConnectionCommand::Close(reason)) {
            Ok(()) => Ok(()),
            // A backlog of commands already includes a close.
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ConnectionClosed),
        }
    }

    /// Waits until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}

// ============================================================================
// Command Loop Side
// ============================================================================

impl Connection {
    /// Claims the command receiver; only the first call gets it.
    pub(crate) fn take_commands(&self) -> Option<mpsc::Receiver<ConnectionCommand>> {
        self.shared.commands.lock().take()
    }

    /// Publishes a new lifecycle state.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.shared.state.send_replace(state);
    }

    /// Publishes the last activity time.
    pub(crate) fn set_last_activity(&self, at: Instant) {
        *self.shared.last_activity.lock() = at;
    }

    /// Publishes the requests in flight.
    pub(crate) fn set_requests(&self, requests: Vec<PayloadRequest>) {
        *self.shared.requests.lock() = requests;
    }

    /// Records why the connection closed.
    pub(crate) fn set_close_reason(&self, reason: CloseReason) {
        *self.shared.close_reason.lock() = Some(reason);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::RequestId;

    #[tokio::test]
    async fn test_new_connection_is_connecting() {
        let conn = Connection::new(ConnectionId::generate());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_open());
        assert!(conn.active_request().is_none());
        assert!(conn.close_reason().is_none());
    }

    #[tokio::test]
    async fn test_commands_claimed_once() {
        let conn = Connection::new(ConnectionId::generate());
        assert!(conn.take_commands().is_some());
        assert!(conn.take_commands().is_none());
    }

    #[tokio::test]
    async fn test_close_posts_command() {
        let conn = Connection::new(ConnectionId::generate());
        let mut rx = conn.take_commands().expect("receiver");

        conn.close(CloseReason::Normal).expect("close");
        assert_eq!(
            rx.recv().await,
            Some(ConnectionCommand::Close(CloseReason::Normal))
        );
    }

    #[tokio::test]
    async fn test_close_after_loop_exit_fails() {
        let conn = Connection::new(ConnectionId::generate());
        drop(conn.take_commands());

        assert!(matches!(
            conn.close(CloseReason::Normal),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_published_state_is_shared_by_clones() {
        let conn = Connection::new(ConnectionId::generate());
        let clone = conn.clone();

        conn.set_state(ConnectionState::Open);
        conn.set_requests(vec![PayloadRequest::new(RequestId::new(1), 10, 4)]);

        assert!(clone.is_open());
        assert_eq!(
            clone.active_request().map(|r| r.request_id),
            Some(RequestId::new(1))
        );
    }

    #[tokio::test]
    async fn test_closed_resolves_on_close() {
        let conn = Connection::new(ConnectionId::generate());
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };

        conn.set_state(ConnectionState::Closed);
        waiter.await.expect("waiter");
    }
}
