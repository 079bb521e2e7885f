//! Per-connection command loop.
//!
//! One [`ConnectionActor`] runs per connection as a tokio task and is the
//! only writer to that connection's transport. It owns the
//! [`Multiplexer`], the [`HeartbeatMonitor`], the [`TransportSender`] and
//! the active transfers; the [`Connection`] handle only sees published
//! snapshots.
//!
//! # Event Loop
//!
//! Every iteration first pumps the multiplexer into the transport until
//! the transport blocks or nothing is ready, then waits on:
//!
//! - Commands posted through the [`Connection`] handle
//! - Client messages from the socket reader
//! - Transport capacity (pending frame or saturation)
//! - The heartbeat deadline
//! - Chunks from producer workers, round-robin, while the data queue has room
//! - The drain deadline while closing

// ============================================================================
// Imports
// ============================================================================

use std::future::poll_fn;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::hub::HubConfig;
use crate::identifiers::{ConnectionId, RequestId};
use crate::payload::{PayloadProducer, PayloadRequest, ProducerWorker};
use crate::protocol::{ClientMessage, CloseReason, DataChunk, Frame, FrameClass, Inbound};
use crate::transport::TransportSender;

use super::handle::{Connection, ConnectionCommand, ConnectionState};
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::multiplexer::Multiplexer;
use super::registry::ConnectionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Stand-in deadline for disabled timer branches.
const FAR_FUTURE: Duration = Duration::from_secs(86_400);

// ============================================================================
// ActiveTransfer
// ============================================================================

/// A request being streamed.
#[derive(Debug)]
struct ActiveTransfer {
    /// Progress accounting.
    request: PayloadRequest,
    /// Producer task feeding this request.
    worker: ProducerWorker,
}

// ============================================================================
// ConnectionActor
// ============================================================================

/// Command loop of one connection.
#[derive(Debug)]
pub struct ConnectionActor {
    /// Handle shared with the registry.
    connection: Connection,
    /// Registry to leave on exit.
    registry: Arc<ConnectionRegistry>,
    /// Limits and timings.
    config: Arc<HubConfig>,
    /// Outbound scheduler.
    mux: Multiplexer,
    /// Liveness state.
    heartbeat: HeartbeatMonitor,
    /// Link to the socket writer.
    sender: TransportSender,
    /// Client messages from the socket reader.
    inbound: mpsc::Receiver<Inbound>,
    /// Set once the socket reader is gone.
    inbound_closed: bool,
    /// Commands from the handle.
    commands: mpsc::Receiver<ConnectionCommand>,
    /// Requests being streamed.
    transfers: Vec<ActiveTransfer>,
    /// Next transfer polled for a chunk.
    cursor: usize,
    /// Id for the next accepted request.
    next_request_id: RequestId,
    /// Lifecycle state.
    state: ConnectionState,
    /// Why the connection is closing.
    close_reason: Option<CloseReason>,
    /// Set once the final Close frame was handed to the transport.
    close_sent: bool,
    /// Hard stop while draining.
    drain_deadline: Option<Instant>,
}

impl ConnectionActor {
    /// Spawns the command loop for a registered connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if a command loop was already
    /// started for this connection.
    pub fn spawn(
        connection: Connection,
        registry: Arc<ConnectionRegistry>,
        config: Arc<HubConfig>,
        sender: TransportSender,
        inbound: mpsc::Receiver<Inbound>,
    ) -> Result<JoinHandle<()>> {
        let commands = connection.take_commands().ok_or(Error::ConnectionClosed)?;
        let now = Instant::now();

        let actor = Self {
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_interval,
                config.heartbeat_timeout,
                now,
            ),
            mux: Multiplexer::new(config.data_queue_capacity),
            connection,
            registry,
            config,
            sender,
            inbound,
            inbound_closed: false,
            commands,
            transfers: Vec::new(),
            cursor: 0,
            next_request_id: RequestId::new(1),
            state: ConnectionState::Connecting,
            close_reason: None,
            close_sent: false,
            drain_deadline: None,
        };

        Ok(tokio::spawn(actor.run()))
    }

    /// Returns the connection id.
    #[inline]
    fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    async fn run(mut self) {
        self.set_state(ConnectionState::Open);
        self.connection.set_last_activity(self.heartbeat.last_activity());
        debug!(connection_id = %self.id(), "Command loop started");

        loop {
            if let Err(e) = self.pump() {
                self.abort(CloseReason::TransportError(e.to_string())).await;
            }

            match self.state {
                ConnectionState::Closed => break,
                ConnectionState::Draining if self.close_sent && !self.sender.is_blocked() => break,
                _ => {}
            }

            let now = Instant::now();
            let open = self.state == ConnectionState::Open;
            let heartbeat_at = self.heartbeat.next_deadline();
            let drain_at = self.drain_deadline;
            let wants_writable =
                self.sender.is_blocked() || (self.sender.is_saturated() && self.mux.has_data());
            let wants_chunks = open && !self.transfers.is_empty() && self.mux.has_data_capacity();

            tokio::select! {
                biased;

                Some(command) = self.commands.recv() => {
                    self.on_command(command).await;
                }

                item = self.inbound.recv(), if !self.inbound_closed => {
                    self.on_inbound(item).await;
                }

                result = self.sender.writable(), if wants_writable => {
                    if let Err(e) = result {
                        error!(connection_id = %self.id(), error = %e, "Transport failed");
                        self.abort(CloseReason::TransportError(e.to_string())).await;
                    }
                }

                _ = sleep_until(heartbeat_at.unwrap_or(now + FAR_FUTURE)), if open && heartbeat_at.is_some() => {
                    self.on_heartbeat_tick().await;
                }

                (request_id, chunk) = poll_fn(|cx| poll_chunk(&mut self.transfers, &mut self.cursor, cx)), if wants_chunks => {
                    self.on_chunk(request_id, chunk);
                }

                _ = sleep_until(drain_at.unwrap_or(now + FAR_FUTURE)), if drain_at.is_some() => {
                    warn!(connection_id = %self.id(), "Close frame not flushed in time");
                    self.set_state(ConnectionState::Closed);
                }
            }
        }

        self.teardown().await;
    }

    /// Moves ready frames from the multiplexer into the transport.
    fn pump(&mut self) -> Result<()> {
        while !self.sender.is_blocked() && !self.close_sent {
            self.mux.set_data_paused(self.sender.is_saturated());

            let Some(frame) = self.mux.pull_next() else {
                break;
            };
            let is_close = matches!(frame, Frame::Close { .. });

            self.sender.send(frame)?;
            self.touch(Instant::now());

            if is_close {
                self.close_sent = true;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    async fn on_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Close(reason) => self.begin_close(reason).await,
        }
    }

    async fn on_inbound(&mut self, item: Option<Inbound>) {
        let Some(item) = item else {
            self.inbound_closed = true;
            if self.state == ConnectionState::Open {
                self.abort(CloseReason::TransportError("socket reader closed".to_string()))
                    .await;
            }
            return;
        };

        let now = Instant::now();
        self.touch(now);

        match item {
            Inbound::TransportError(message) => {
                if self.state == ConnectionState::Open {
                    error!(connection_id = %self.id(), error = %message, "Transport failed");
                }
                self.abort(CloseReason::TransportError(message)).await;
            }

            _ if self.state != ConnectionState::Open => {
                trace!(connection_id = %self.id(), "Ignoring client message while closing");
            }

            Inbound::Malformed(message) => {
                warn!(connection_id = %self.id(), error = %message, "Malformed client message");
                self.begin_close(CloseReason::ProtocolError(message)).await;
            }

            Inbound::Message(message) => {
                trace!(connection_id = %self.id(), kind = message.kind(), "Client message");
                match message {
                    ClientMessage::Ping => self.push_control(Frame::Pong),
                    ClientMessage::Pong => {
                        if let Err(e) = self.heartbeat.on_pong(now) {
                            self.begin_close(CloseReason::ProtocolError(e.to_string())).await;
                        }
                    }
                    ClientMessage::RequestLargeData {
                        invocation_id,
                        size_mb,
                    } => self.on_request(invocation_id, size_mb),
                    ClientMessage::Cancel { request_id } => self.on_cancel(request_id).await,
                    ClientMessage::Close => self.begin_close(CloseReason::Normal).await,
                }
            }
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        match self.heartbeat.poll(Instant::now()) {
            HeartbeatAction::Wait => {}
            HeartbeatAction::SendPing => self.push_control(Frame::Ping),
            HeartbeatAction::TimedOut => {
                warn!(
                    connection_id = %self.id(),
                    timeout_ms = self.heartbeat.timeout_ms(),
                    transfers = self.transfers.len(),
                    "Heartbeat timeout"
                );
                self.abort(CloseReason::HeartbeatTimeout).await;
            }
        }
    }

    /// Handles a payload request.
    fn on_request(&mut self, invocation_id: u64, size_mb: u32) {
        let total_bytes = match self.config.payload_bytes(size_mb) {
            Ok(bytes) => bytes,
            Err(e) => return self.reject(invocation_id, &e),
        };

        if self.transfers.len() >= self.config.max_concurrent_requests {
            let e = Error::resource(format!(
                "concurrent request limit reached ({})",
                self.config.max_concurrent_requests
            ));
            return self.reject(invocation_id, &e);
        }

        let request_id = self.next_request_id;
        let chunk_size = self.config.chunk_size;
        let request = PayloadRequest::new(request_id, total_bytes, chunk_size);

        let producer = if total_bytes == 0 {
            None
        } else {
            let seed = self.config.seed_for(request_id.as_u64());
            match PayloadProducer::start(request_id, total_bytes, chunk_size, seed) {
                Ok(producer) => Some(producer),
                Err(e) => return self.reject(invocation_id, &e),
            }
        };

        self.next_request_id = request_id.next();
        self.push_control(Frame::Accepted {
            invocation_id,
            request_id,
            total_bytes,
            chunk_count: request.chunk_count(),
        });

        info!(
            connection_id = %self.id(),
            %request_id,
            invocation_id,
            size_mb,
            total_bytes,
            chunks = request.chunk_count(),
            "Payload request accepted"
        );

        let Some(producer) = producer else {
            // Nothing to stream; no data can precede the marker.
            let completed = Frame::Completed {
                request_id,
                chunks: 0,
                bytes: 0,
            };
            let _ = self.mux.enqueue(completed, FrameClass::Control);
            return;
        };

        self.transfers.push(ActiveTransfer {
            request,
            worker: ProducerWorker::spawn(producer, self.config.producer_channel_capacity),
        });
        self.heartbeat.set_transfer_active(true);
        self.publish_requests();
    }

    /// Handles a chunk, or the end of a producer's stream.
    fn on_chunk(&mut self, request_id: RequestId, chunk: Option<DataChunk>) {
        let Some(index) = self
            .transfers
            .iter()
            .position(|t| t.request.request_id == request_id)
        else {
            return;
        };

        if let Some(chunk) = chunk {
            let transfer = &mut self.transfers[index];
            transfer.request.record(chunk.len());
            trace!(%request_id, seq = chunk.seq, len = chunk.len(), "Chunk queued");

            if let Err(e) = self.mux.push(Frame::Data(chunk)) {
                warn!(connection_id = %self.id(), %request_id, error = %e, "Chunk dropped");
            }
            if !self.transfers[index].request.is_complete() {
                self.publish_requests();
                return;
            }
        }

        let ActiveTransfer { request, .. } = self.transfers.remove(index);
        if self.cursor >= self.transfers.len() {
            self.cursor = 0;
        }

        if request.is_complete() {
            let _ = self.mux.push(Frame::Completed {
                request_id,
                chunks: request.chunk_count(),
                bytes: request.bytes_emitted,
            });
            info!(
                connection_id = %self.id(),
                %request_id,
                bytes = request.bytes_emitted,
                "Payload transfer completed"
            );
        } else {
            warn!(
                connection_id = %self.id(),
                %request_id,
                bytes = request.bytes_emitted,
                expected = request.total_bytes,
                "Producer stopped early"
            );
            self.mux.cancel_request(request_id);
            self.push_control(Frame::Cancelled { request_id });
        }

        self.heartbeat.set_transfer_active(!self.transfers.is_empty());
        self.publish_requests();
    }

    /// Handles a client cancel.
    async fn on_cancel(&mut self, request_id: RequestId) {
        let Some(index) = self
            .transfers
            .iter()
            .position(|t| t.request.request_id == request_id)
        else {
            debug!(connection_id = %self.id(), %request_id, "Cancel for unknown request");
            return;
        };

        let mut transfer = self.transfers.remove(index);
        if self.cursor >= self.transfers.len() {
            self.cursor = 0;
        }

        let released = transfer.worker.cancel().await;
        let purged = self.mux.cancel_request(request_id);
        self.push_control(Frame::Cancelled { request_id });

        info!(
            connection_id = %self.id(),
            %request_id,
            bytes = transfer.request.bytes_emitted,
            released,
            purged,
            "Payload transfer cancelled"
        );

        self.heartbeat.set_transfer_active(!self.transfers.is_empty());
        self.publish_requests();
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Starts an orderly close: transfers stop and queued control frames,
    /// then a final Close frame, drain.
    async fn begin_close(&mut self, reason: CloseReason) {
        if self.state != ConnectionState::Open {
            return;
        }

        info!(connection_id = %self.id(), %reason, "Closing connection");

        self.cancel_transfers().await;
        self.mux.clear_data();
        self.push_control(Frame::Close {
            reason: reason.clone(),
        });

        self.close_reason = Some(reason);
        self.drain_deadline = Some(Instant::now() + self.config.heartbeat_timeout);
        self.set_state(ConnectionState::Draining);
    }

    /// Terminates without draining.
    async fn abort(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.cancel_transfers().await;
        self.mux.clear_data();

        // Best effort: the peer may still be reading.
        if !matches!(reason, CloseReason::TransportError(_))
            && !self.close_sent
            && !self.sender.is_blocked()
            && !self.sender.is_closed()
        {
            let _ = self.sender.send(Frame::Close {
                reason: reason.clone(),
            });
            self.close_sent = true;
        }

        self.close_reason.get_or_insert(reason);
        self.set_state(ConnectionState::Closed);
    }

    /// Stops every producer and releases buffered chunks.
    async fn cancel_transfers(&mut self) {
        for mut transfer in self.transfers.drain(..) {
            let released = transfer.worker.cancel().await;
            debug!(
                connection_id = %self.connection.id(),
                request_id = %transfer.request.request_id,
                released,
                "Transfer stopped"
            );
        }
        self.cursor = 0;
        self.heartbeat.set_transfer_active(false);
        self.publish_requests();
    }

    /// Releases resources, publishes the final state and leaves the registry.
    async fn teardown(mut self) {
        self.cancel_transfers().await;

        let reason = self.close_reason.take().unwrap_or(CloseReason::Normal);
        let stats = self.mux.stats();
        let heartbeat = self.heartbeat.stats();

        debug!(
            connection_id = %self.id(),
            control_emitted = stats.control_emitted,
            data_emitted = stats.data_emitted,
            data_discarded = stats.data_discarded,
            pings_sent = heartbeat.pings_sent,
            pongs_received = heartbeat.pongs_received,
            "Command loop terminated"
        );

        self.connection.set_close_reason(reason);
        self.set_state(ConnectionState::Closed);
        self.registry.unregister(self.id());
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Enqueues a control frame.
    fn push_control(&mut self, frame: Frame) {
        // The control queue has no bound.
        let _ = self.mux.enqueue(frame, FrameClass::Control);
    }

    /// Sends a Rejected frame for a request that cannot be served.
    fn reject(&mut self, invocation_id: u64, error: &Error) {
        warn!(connection_id = %self.id(), invocation_id, error = %error, "Payload request rejected");
        self.push_control(Frame::Rejected {
            invocation_id,
            error: error.to_string(),
        });
    }

    /// Records activity in the heartbeat monitor and the handle.
    fn touch(&mut self, now: Instant) {
        self.heartbeat.record_activity(now);
        self.connection.set_last_activity(now);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(connection_id = %self.id(), from = %self.state, to = %state, "State change");
        }
        self.state = state;
        self.connection.set_state(state);
    }

    fn publish_requests(&self) {
        self.connection
            .set_requests(self.transfers.iter().map(|t| t.request).collect());
    }
}

/// Polls transfers for a chunk, starting after the last one served.
fn poll_chunk(
    transfers: &mut [ActiveTransfer],
    cursor: &mut usize,
    cx: &mut Context<'_>,
) -> Poll<(RequestId, Option<DataChunk>)> {
    let len = transfers.len();

    for offset in 0..len {
        let index = (*cursor + offset) % len;
        let transfer = &mut transfers[index];

        if let Poll::Ready(chunk) = transfer.worker.poll_recv(cx) {
            *cursor = (index + 1) % len;
            return Poll::Ready((transfer.request.request_id, chunk));
        }
    }

    Poll::Pending
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::payload::MIB;
    use crate::transport::{TransportSink, pipe};

    const H: Duration = Duration::from_secs(15);
    const T: Duration = Duration::from_secs(30);

    /// Test peer standing in for the socket tasks.
    struct Peer {
        connection: Connection,
        registry: Arc<ConnectionRegistry>,
        sink: TransportSink,
        inbound: mpsc::Sender<Inbound>,
        task: JoinHandle<()>,
    }

    impl Peer {
        fn start(config: HubConfig) -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let connection = registry
                .register(ConnectionId::generate())
                .expect("register");
            let (sender, sink) = pipe();
            let (inbound, inbound_rx) = mpsc::channel(config.inbound_buffer);

            let task = ConnectionActor::spawn(
                connection.clone(),
                Arc::clone(&registry),
                Arc::new(config),
                sender,
                inbound_rx,
            )
            .expect("spawn");

            Self {
                connection,
                registry,
                sink,
                inbound,
                task,
            }
        }

        async fn send(&self, message: ClientMessage) {
            self.inbound
                .send(Inbound::Message(message))
                .await
                .expect("actor alive");
        }

        async fn next_frame(&mut self) -> Option<Frame> {
            let frame = self.sink.recv().await?;
            self.sink.complete();
            Some(frame)
        }

        /// Reads until a frame matching `pred`, answering Pings.
        async fn expect_frame(&mut self, pred: impl Fn(&Frame) -> bool) -> Frame {
            loop {
                let frame = self.next_frame().await.expect("connection open");
                if pred(&frame) {
                    return frame;
                }
                if frame == Frame::Ping {
                    self.send(ClientMessage::Pong).await;
                }
            }
        }

        async fn request(&self, invocation_id: u64, size_mb: u32) {
            self.send(ClientMessage::RequestLargeData {
                invocation_id,
                size_mb,
            })
            .await;
        }
    }

    fn config() -> HubConfig {
        HubConfig::new().with_heartbeat(H, T)
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_transfer_keeps_heartbeat() {
        // Time the peer spends writing one chunk.
        const CHUNK_WRITE: Duration = Duration::from_millis(20);

        let mut peer = Peer::start(config().with_chunk_size(16 * 1024));
        let start = Instant::now();
        peer.request(1, 50).await;

        let accepted = peer.next_frame().await.expect("accepted");
        let Frame::Accepted {
            request_id,
            total_bytes,
            chunk_count,
            ..
        } = accepted
        else {
            panic!("expected accepted, got {accepted:?}");
        };
        assert_eq!(total_bytes, 50 * MIB);
        assert_eq!(chunk_count, 3_200);

        let mut pings = Vec::new();
        let mut data_times = Vec::new();
        let mut next_seq = 0;
        let mut received = 0u64;

        loop {
            let frame = peer.sink.recv().await.expect("connection open");
            match &frame {
                Frame::Data(chunk) => {
                    assert_eq!(chunk.request_id, request_id);
                    assert_eq!(chunk.seq, next_seq);
                    next_seq += 1;
                    received += chunk.len() as u64;
                    data_times.push(Instant::now());
                    tokio::time::sleep(CHUNK_WRITE).await;
                }
                Frame::Ping => {
                    pings.push(Instant::now());
                    peer.send(ClientMessage::Pong).await;
                }
                Frame::Completed { chunks, bytes, .. } => {
                    assert_eq!(*chunks, 3_200);
                    assert_eq!(*bytes, 50 * MIB);
                    peer.sink.complete();
                    break;
                }
                other => panic!("unexpected frame {other:?}"),
            }
            peer.sink.complete();
        }

        assert_eq!(received, 50 * MIB);
        assert_eq!(next_seq, 3_200);
        assert!(pings.len() >= 3, "only {} pings", pings.len());

        // Pings fall due every H from the start of the connection. Each one
        // arrives within one chunk write of falling due and overtakes the
        // rest of the data queue.
        let bound = CHUNK_WRITE + Duration::from_millis(1);
        for (k, &delivered) in pings.iter().enumerate() {
            let due = start + H * (k as u32 + 1);
            assert!(delivered >= due, "ping {k} before due");
            assert!(
                delivered - due <= bound,
                "ping {k} delivered {:?} after due",
                delivered - due
            );

            let overtaken = data_times
                .iter()
                .filter(|&&t| t >= due && t < delivered)
                .count();
            assert!(overtaken <= 1, "ping {k} waited behind {overtaken} chunks");
        }
        for pair in pings.windows(2) {
            assert!(pair[1] - pair[0] <= H + bound, "gap {:?}", pair[1] - pair[0]);
        }

        assert!(peer.connection.is_open());
        assert!(peer.connection.active_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_dominates_transfer() {
        let peer = Peer::start(config());
        let start = Instant::now();
        peer.request(1, 50).await;

        // Read slowly and never answer a Ping.
        let mut sink = peer.sink;
        let reader = tokio::spawn(async move {
            let mut close = None;
            while let Some(frame) = sink.recv().await {
                sink.complete();
                match frame {
                    Frame::Data(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                    Frame::Close { reason } => close = Some(reason),
                    Frame::Completed { .. } => panic!("transfer must not complete"),
                    _ => {}
                }
            }
            close
        });

        peer.task.await.expect("actor");
        let elapsed = Instant::now() - start;
        assert!(elapsed >= H + T, "closed after {elapsed:?}");
        assert!(elapsed <= H + T + Duration::from_secs(1), "closed after {elapsed:?}");

        assert_eq!(
            peer.connection.close_reason(),
            Some(CloseReason::HeartbeatTimeout)
        );
        assert_eq!(peer.connection.state(), ConnectionState::Closed);
        assert!(peer.connection.active_requests().is_empty());
        assert!(peer.registry.is_empty());

        // The diagnostic Close frame is best effort behind a full transport.
        let close = reader.await.expect("reader");
        assert!(close.is_none_or(|reason| reason == CloseReason::HeartbeatTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_pinged() {
        let mut peer = Peer::start(config());
        let start = Instant::now();

        assert_eq!(peer.next_frame().await, Some(Frame::Ping));
        let elapsed = Instant::now() - start;
        assert!(elapsed >= H && elapsed < H + Duration::from_millis(10));

        peer.send(ClientMessage::Pong).await;
        assert_eq!(peer.next_frame().await, Some(Frame::Ping));
        assert!(peer.connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_size_completes_immediately() {
        let mut peer = Peer::start(config());
        peer.request(7, 0).await;

        let accepted = peer.next_frame().await.expect("accepted");
        assert!(matches!(
            accepted,
            Frame::Accepted {
                invocation_id: 7,
                total_bytes: 0,
                chunk_count: 0,
                ..
            }
        ));
        assert!(matches!(
            peer.next_frame().await,
            Some(Frame::Completed {
                chunks: 0,
                bytes: 0,
                ..
            })
        ));
        assert!(peer.connection.active_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_limit_rejected_then_valid_request_served() {
        let mut peer = Peer::start(config().with_max_payload_bytes(4 * MIB));
        peer.request(1, 5).await;

        let rejected = peer.next_frame().await.expect("rejected");
        assert!(matches!(rejected, Frame::Rejected { invocation_id: 1, .. }));
        assert!(peer.connection.is_open());

        peer.request(2, 1).await;
        let accepted = peer.next_frame().await.expect("accepted");
        assert!(matches!(accepted, Frame::Accepted { invocation_id: 2, .. }));

        let mut bytes = 0u64;
        loop {
            match peer.next_frame().await.expect("open") {
                Frame::Data(chunk) => bytes += chunk.len() as u64,
                Frame::Completed { bytes: total, .. } => {
                    assert_eq!(total, MIB);
                    break;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(bytes, MIB);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_limit_rejects_second_request() {
        let mut peer = Peer::start(config());
        peer.request(1, 20).await;
        peer.request(2, 1).await;

        peer.expect_frame(|f| matches!(f, Frame::Accepted { invocation_id: 1, .. }))
            .await;
        let rejected = peer
            .expect_frame(|f| matches!(f, Frame::Rejected { .. }))
            .await;
        assert!(matches!(rejected, Frame::Rejected { invocation_id: 2, .. }));
        assert_eq!(peer.connection.active_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_resources() {
        let mut peer = Peer::start(config());
        peer.request(1, 50).await;

        let Frame::Accepted { request_id, .. } = peer
            .expect_frame(|f| matches!(f, Frame::Accepted { .. }))
            .await
        else {
            unreachable!();
        };
        peer.expect_frame(|f| matches!(f, Frame::Data(_))).await;
        assert_eq!(
            peer.connection.active_request().map(|r| r.request_id),
            Some(request_id)
        );

        peer.send(ClientMessage::Cancel { request_id }).await;
        peer.expect_frame(|f| *f == Frame::Cancelled { request_id })
            .await;
        assert!(peer.connection.active_requests().is_empty());

        // Nothing of the cancelled request follows.
        peer.send(ClientMessage::Close).await;
        let frame = peer.next_frame().await.expect("close");
        assert_eq!(
            frame,
            Frame::Close {
                reason: CloseReason::Normal
            }
        );
        assert_eq!(peer.next_frame().await, None);

        peer.task.await.expect("actor");
        assert!(peer.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_ping_answered() {
        let mut peer = Peer::start(config());
        peer.send(ClientMessage::Ping).await;
        assert_eq!(peer.next_frame().await, Some(Frame::Pong));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_closes_with_protocol_error() {
        let mut peer = Peer::start(config());
        peer.inbound
            .send(Inbound::Malformed("unknown method".to_string()))
            .await
            .expect("send");

        let frame = peer.next_frame().await.expect("close");
        assert!(matches!(
            frame,
            Frame::Close {
                reason: CloseReason::ProtocolError(_)
            }
        ));
        assert_eq!(peer.next_frame().await, None);

        peer.task.await.expect("actor");
        assert!(matches!(
            peer.connection.close_reason(),
            Some(CloseReason::ProtocolError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_pong_is_protocol_error() {
        let mut peer = Peer::start(config());
        peer.send(ClientMessage::Pong).await;

        let frame = peer.next_frame().await.expect("close");
        assert!(matches!(
            frame,
            Frame::Close {
                reason: CloseReason::ProtocolError(_)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_closes_immediately() {
        let mut peer = Peer::start(config());
        peer.request(1, 50).await;
        peer.expect_frame(|f| matches!(f, Frame::Data(_))).await;

        peer.inbound
            .send(Inbound::TransportError("reset".to_string()))
            .await
            .expect("send");

        peer.task.await.expect("actor");
        assert_eq!(
            peer.connection.close_reason(),
            Some(CloseReason::TransportError("reset".to_string()))
        );
        assert!(peer.connection.active_requests().is_empty());
        assert!(peer.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_through_registry() {
        let mut peer = Peer::start(config());
        peer.registry.shutdown();

        assert_eq!(
            peer.next_frame().await,
            Some(Frame::Close {
                reason: CloseReason::ServerShutdown
            })
        );
        peer.task.await.expect("actor");
        assert_eq!(peer.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_bounded() {
        let peer = Peer::start(config());
        peer.request(1, 50).await;

        // The peer never reads, so the transport fills and the Close frame
        // cannot be handed over.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        peer.connection.close(CloseReason::Normal).expect("close");

        peer.task.await.expect("actor");
        assert!(Instant::now() - start >= T);
        assert_eq!(peer.connection.close_reason(), Some(CloseReason::Normal));
        assert!(peer.registry.is_empty());
    }
}
