//! Socket reader and writer tasks for one WebSocket connection.
//!
//! The WebSocket stream is split; each half gets its own task:
//!
//! - **Writer**: drains the [`TransportSink`], encodes frames and writes
//!   them. It is the only code that writes to the socket.
//! - **Reader**: decodes client messages and forwards them to the
//!   connection's command loop over a bounded channel.
//!
//! Either task ending closes its side of the link, which the command loop
//! observes as a transport error.

// ============================================================================
// Imports
// ============================================================================

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Inbound, wire};

use super::TransportSink;

// ============================================================================
// SocketTasks
// ============================================================================

/// Join handles of a connection's socket tasks.
#[derive(Debug)]
pub struct SocketTasks {
    /// Writer task.
    pub writer: JoinHandle<()>,
    /// Reader task.
    pub reader: JoinHandle<()>,
}

/// Spawns the reader and writer tasks for a WebSocket stream.
pub fn spawn<S>(
    connection_id: ConnectionId,
    ws_stream: WebSocketStream<S>,
    sink: TransportSink,
    inbound: mpsc::Sender<Inbound>,
) -> SocketTasks
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws_write, ws_read) = ws_stream.split();

    SocketTasks {
        writer: tokio::spawn(write_loop(connection_id, ws_write, sink)),
        reader: tokio::spawn(read_loop(connection_id, ws_read, inbound)),
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writes frames until the sender goes away, a Close frame is written or
/// the socket fails.
async fn write_loop<S>(
    connection_id: ConnectionId,
    mut ws_write: SplitSink<WebSocketStream<S>, Message>,
    mut sink: TransportSink,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = sink.recv().await {
        let close_reason = match &frame {
            Frame::Close { reason } => Some(reason.clone()),
            _ => None,
        };

        let message = match wire::encode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%connection_id, error = %e, "Failed to encode frame");
                sink.complete();
                continue;
            }
        };

        if let Err(e) = ws_write.send(message).await {
            error!(%connection_id, error = %e, "WebSocket write failed");
            sink.complete();
            return;
        }
        sink.complete();

        if let Some(reason) = close_reason {
            trace!(%connection_id, %reason, "Close frame written");
            let _ = ws_write.send(wire::close_message(&reason)).await;
            break;
        }
    }

    let _ = ws_write.close().await;
    debug!(%connection_id, "Writer task terminated");
}

// ============================================================================
// Reader
// ============================================================================

/// Forwards decoded client messages until the socket ends or the command
/// loop goes away.
async fn read_loop<S>(
    connection_id: ConnectionId,
    mut ws_read: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::Sender<Inbound>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let item = match ws_read.next().await {
            Some(Ok(message)) => {
                let is_close = matches!(message, Message::Close(_));
                match wire::decode_client(&message) {
                    Some(item) if is_close => {
                        let _ = inbound.send(item).await;
                        debug!(%connection_id, "WebSocket closed by client");
                        break;
                    }
                    Some(item) => item,
                    None => continue,
                }
            }
            Some(Err(e)) => {
                let _ = inbound.send(Inbound::TransportError(e.to_string())).await;
                warn!(%connection_id, error = %e, "WebSocket read failed");
                break;
            }
            None => {
                let _ = inbound
                    .send(Inbound::TransportError("stream ended".to_string()))
                    .await;
                debug!(%connection_id, "WebSocket stream ended");
                break;
            }
        };

        if inbound.send(item).await.is_err() {
            break;
        }
    }

    debug!(%connection_id, "Reader task terminated");
}
