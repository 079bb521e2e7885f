//! WebSocket listener that feeds the connection core.
//!
//! The hub binds one TCP port, upgrades connections that ask for the
//! configured path and hands each one to its own command loop. Requests
//! for any other path are refused during the upgrade with HTTP 404.
//!
//! # Per-Connection Tasks
//!
//! ```text
//!                     ┌──────────────┐
//!   TCP ──upgrade──►  │ reader task  │ ── Inbound ──►┌──────────────────┐
//!                     └──────────────┘               │ ConnectionActor  │
//!                     ┌──────────────┐               │ (command loop)   │
//!   TCP ◄───────────  │ writer task  │ ◄── pipe ──── └──────────────────┘
//!                     └──────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionActor, ConnectionRegistry};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::transport::{pipe, websocket};

use super::HubConfig;

// ============================================================================
// Hub
// ============================================================================

/// WebSocket hub serving payload requests.
///
/// # Example
///
/// ```ignore
/// let hub = Hub::bind(HubConfig::new()).await?;
/// println!("Listening on {}", hub.ws_url());
///
/// // ...
///
/// hub.shutdown().await;
/// ```
#[derive(Debug)]
pub struct Hub {
    /// Bound address.
    local_addr: SocketAddr,

    /// Shared configuration.
    config: Arc<HubConfig>,

    /// Live connections.
    registry: Arc<ConnectionRegistry>,

    /// Stops the accept loop.
    shutdown_tx: watch::Sender<bool>,

    /// Accept loop task.
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Hub - Constructor
// ============================================================================

impl Hub {
    /// Validates `config`, binds the listener and starts accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Io`] if binding fails
    pub async fn bind(config: HubConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let addr = SocketAddr::new(config.bind_ip, config.port);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = Arc::new(Self {
            local_addr,
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_tx,
            accept_task: Mutex::new(None),
        });

        let task = tokio::spawn(Arc::clone(&hub).accept_loop(listener, shutdown_rx));
        *hub.accept_task.lock() = Some(task);

        info!(addr = %local_addr, path = %hub.config.path, "Hub started");

        Ok(hub)
    }
}

// ============================================================================
// Hub - Public API
// ============================================================================

impl Hub {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the endpoint URL.
    ///
    /// Format: `ws://{ip}:{port}{path}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.config.path)
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, closes every connection and waits for them to
    /// leave the registry, at most one heartbeat timeout.
    pub async fn shutdown(&self) {
        info!("Hub shutting down");

        let _ = self.shutdown_tx.send(true);
        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        let events = self.registry.subscribe();
        self.registry.shutdown();

        let drained = timeout(
            self.config.heartbeat_timeout,
            self.registry.until_empty(events),
        )
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.registry.len(),
                "Connections still open after shutdown timeout"
            );
        }

        info!("Hub shutdown complete");
    }
}

// ============================================================================
// Hub - Accept Loop
// ============================================================================

impl Hub {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Accept loop shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let hub = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = hub.handle_connection(stream, addr).await {
                                warn!(error = %e, %addr, "Connection handling failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one TCP connection and runs it to completion.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(%addr, "New TCP connection");

        let path = self.config.path.clone();
        let check_path = move |request: &Request, response: Response| {
            if request.uri().path() == path {
                return Ok(response);
            }
            debug!(requested = %request.uri().path(), "Upgrade refused for unknown path");
            let mut refusal = ErrorResponse::new(Some("Not Found".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        };

        let ws_stream = timeout(self.config.upgrade_timeout, accept_hdr_async(stream, check_path))
            .await
            .map_err(|_| Error::transport("WebSocket upgrade timed out"))?
            .map_err(|e| Error::transport(format!("WebSocket upgrade failed: {e}")))?;

        let connection_id = ConnectionId::generate();
        let connection = self.registry.register(connection_id)?;

        let (sender, sink) = pipe();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_buffer);

        let mut tasks = websocket::spawn(connection_id, ws_stream, sink, inbound_tx);
        let actor = ConnectionActor::spawn(
            connection,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            sender,
            inbound_rx,
        )?;

        debug!(%connection_id, %addr, "WebSocket connection established");

        if let Err(e) = actor.await {
            error!(%connection_id, error = %e, "Command loop panicked");
        }

        // The writer flushes the final frames once the command loop is gone.
        tasks.reader.abort();
        if timeout(self.config.heartbeat_timeout, &mut tasks.writer)
            .await
            .is_err()
        {
            tasks.writer.abort();
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
