//! Registry of live connections.
//!
//! The registry is the only state shared across connections. Every
//! mutation goes through its lock; no connection ever waits on another
//! connection's transfer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectionRegistry             │
//! │  ┌────────────────────────────────────┐  │
//! │  │ ConnectionId(a) → Connection       │  │
//! │  │ ConnectionId(b) → Connection       │  │
//! │  └────────────────────────────────────┘  │
//! │      │ Connected / Disconnected           │
//! └──────┼───────────────────────────────────┘
//!        ▼
//!   broadcast subscribers (logging, metrics)
//! ```

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::CloseReason;

use super::handle::{Connection, ConnectionState};

// ============================================================================
// Constants
// ============================================================================

/// Lifecycle events retained for slow subscribers.
const EVENT_BUFFER: usize = 256;

// ============================================================================
// LifecycleEvent
// ============================================================================

/// Notification emitted when a connection joins or leaves the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A connection was registered.
    Connected {
        /// The new connection.
        id: ConnectionId,
    },
    /// A connection was unregistered.
    Disconnected {
        /// The departed connection.
        id: ConnectionId,
        /// Why it closed, if known.
        reason: Option<CloseReason>,
    },
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Tracks live connections by id.
///
/// # Example
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
/// let mut events = registry.subscribe();
///
/// let connection = registry.register(ConnectionId::generate())?;
/// assert!(matches!(events.recv().await?, LifecycleEvent::Connected { .. }));
///
/// registry.unregister(connection.id());
/// ```
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Live connections.
    connections: RwLock<FxHashMap<ConnectionId, Connection>>,
    /// Lifecycle notifications.
    events: broadcast::Sender<LifecycleEvent>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            connections: RwLock::new(FxHashMap::default()),
            events,
        }
    }

    /// Registers a new connection in the `Connecting` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already registered.
    pub fn register(&self, id: ConnectionId) -> Result<Connection> {
        let connection = {
            let mut connections = self.connections.write();
            if connections.contains_key(&id) {
                return Err(Error::duplicate_id(id));
            }
            let connection = Connection::new(id);
            connections.insert(id, connection.clone());
            connection
        };

        info!(connection_id = %id, "Client connected");
        let _ = self.events.send(LifecycleEvent::Connected { id });

        Ok(connection)
    }

    /// Removes a connection. No-op if absent.
    pub fn unregister(&self, id: ConnectionId) {
        let removed = self.connections.write().remove(&id);

        if let Some(connection) = removed {
            let reason = connection.close_reason();
            connection.set_state(ConnectionState::Closed);

            match &reason {
                Some(reason) => info!(connection_id = %id, %reason, "Client disconnected"),
                None => info!(connection_id = %id, "Client disconnected"),
            }
            let _ = self.events.send(LifecycleEvent::Disconnected { id, reason });
        }
    }

    /// Looks up a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if `id` is not registered.
    pub fn get(&self, id: ConnectionId) -> Result<Connection> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::connection_not_found(id))
    }

    /// Asks a connection to close.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if `id` is not registered
    /// - [`Error::ConnectionClosed`] if its command loop already exited
    pub fn close(&self, id: ConnectionId, reason: CloseReason) -> Result<()> {
        self.get(id)?.close(reason)
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connection is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Returns the ids of all registered connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().copied().collect()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Waits until no connection is left, using `events` as the wake-up.
    ///
    /// Subscribe before triggering the closes. Missed events are fine: the
    /// registry itself is checked after every wake-up.
    pub async fn until_empty(&self, mut events: broadcast::Receiver<LifecycleEvent>) {
        while !self.is_empty() {
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Asks every connection to close with [`CloseReason::ServerShutdown`].
    ///
    /// Connections leave the registry as their command loops finish.
    pub fn shutdown(&self) {
        let connections: Vec<Connection> = self.connections.read().values().cloned().collect();

        for connection in connections {
            if connection.close(CloseReason::ServerShutdown).is_err() {
                // Loop already gone; nothing will unregister it.
                self.unregister(connection.id());
            }
            debug!(connection_id = %connection.id(), "Close requested during shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();

        let connection = registry.register(id).expect("register");
        assert_eq!(connection.id(), id);
        assert_eq!(connection.state(), ConnectionState::Connecting);

        let found = registry.get(id).expect("get");
        assert_eq!(found.id(), id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        registry.register(id).expect("register");

        let err = registry.register(id).unwrap_err();
        assert!(matches!(err, Error::DuplicateId { id: dup } if dup == id));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let registry = ConnectionRegistry::new();
        let err = registry.get(ConnectionId::generate()).unwrap_err();
        assert!(matches!(err, Error::ConnectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unregister_missing_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.unregister(ConnectionId::generate());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_marks_closed_and_notifies() {
        let registry = ConnectionRegistry::new();
        let mut events = registry.subscribe();
        let id = ConnectionId::generate();

        let connection = registry.register(id).expect("register");
        assert_eq!(
            events.recv().await.expect("event"),
            LifecycleEvent::Connected { id }
        );

        connection.set_close_reason(CloseReason::HeartbeatTimeout);
        registry.unregister(id);

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(
            events.recv().await.expect("event"),
            LifecycleEvent::Disconnected {
                id,
                reason: Some(CloseReason::HeartbeatTimeout)
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_routes_to_connection() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        let connection = registry.register(id).expect("register");
        let mut commands = connection.take_commands().expect("commands");

        registry.close(id, CloseReason::Normal).expect("close");
        assert!(commands.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_unregisters_orphans() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        let connection = registry.register(id).expect("register");
        drop(connection.take_commands());

        registry.shutdown();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_until_empty_survives_lagged_events() {
        let registry = ConnectionRegistry::new();
        let events = registry.subscribe();

        // More events than the channel buffers.
        let ids: Vec<ConnectionId> = (0..EVENT_BUFFER + 44)
            .map(|_| {
                let id = ConnectionId::generate();
                registry.register(id).expect("register");
                id
            })
            .collect();

        let mut wait = task::spawn(tokio::task::unconstrained(registry.until_empty(events)));
        assert_pending!(wait.poll());

        let (last, rest) = ids.split_last().expect("ids");
        for id in rest {
            registry.unregister(*id);
        }
        assert_pending!(wait.poll());

        registry.unregister(*last);
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }
}
