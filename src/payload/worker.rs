//! Runs a producer on its own task behind a bounded channel.
//!
//! The connection's command loop never generates bytes itself. A
//! [`ProducerWorker`] owns the task and the receiving end of the channel;
//! when the channel is full the producer task waits, not the command loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::identifiers::RequestId;
use crate::protocol::DataChunk;

use super::PayloadProducer;

// ============================================================================
// ProducerWorker
// ============================================================================

/// Handle to a running producer task.
#[derive(Debug)]
pub struct ProducerWorker {
    /// Request being produced.
    request_id: RequestId,
    /// Checked by the task before every chunk.
    cancelled: Arc<AtomicBool>,
    /// Produced chunks awaiting the multiplexer.
    chunks: mpsc::Receiver<DataChunk>,
    /// Producer task.
    handle: Option<JoinHandle<()>>,
}

impl ProducerWorker {
    /// Spawns `producer` on a tokio task.
    ///
    /// At most `capacity` chunks are buffered between the task and the
    /// caller.
    #[must_use]
    pub fn spawn(producer: PayloadProducer, capacity: usize) -> Self {
        let request_id = producer.request_id();
        let (tx, chunks) = mpsc::channel(capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(Self::run(producer, tx, Arc::clone(&cancelled)));

        debug!(%request_id, capacity, "Producer worker spawned");

        Self {
            request_id,
            cancelled,
            chunks,
            handle: Some(handle),
        }
    }

    /// Returns the request id.
    #[inline]
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Receives the next chunk, or `None` once the producer finished.
    pub async fn recv(&mut self) -> Option<DataChunk> {
        self.chunks.recv().await
    }

    /// Polls for the next chunk.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<DataChunk>> {
        self.chunks.poll_recv(cx)
    }

    /// Stops the producer and releases every buffered chunk.
    ///
    /// Returns the number of chunks that were buffered and discarded.
    /// When this returns the producer task has terminated.
    pub async fn cancel(&mut self) -> usize {
        self.cancelled.store(true, Ordering::Release);
        self.chunks.close();

        let mut released = 0;
        while self.chunks.try_recv().is_ok() {
            released += 1;
        }

        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        debug!(request_id = %self.request_id, released, "Producer worker cancelled");
        released
    }

    /// Producer task body.
    async fn run(
        mut producer: PayloadProducer,
        tx: mpsc::Sender<DataChunk>,
        cancelled: Arc<AtomicBool>,
    ) {
        let request_id = producer.request_id();

        loop {
            if cancelled.load(Ordering::Acquire) {
                producer.cancel();
                break;
            }

            let Some(chunk) = producer.next() else {
                break;
            };

            if tx.send(chunk).await.is_err() {
                producer.cancel();
                break;
            }
        }

        trace!(%request_id, produced = producer.produced(), "Producer task finished");
    }
}

impl Drop for ProducerWorker {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn producer(total: u64, chunk: usize) -> PayloadProducer {
        PayloadProducer::start(RequestId::new(3), total, chunk, 11).expect("valid producer")
    }

    #[tokio::test]
    async fn test_worker_streams_all_chunks_in_order() {
        let mut worker = ProducerWorker::spawn(producer(10_000, 1_000), 2);

        let mut seq = 0;
        let mut bytes = 0;
        while let Some(chunk) = worker.recv().await {
            assert_eq!(chunk.seq, seq);
            assert_eq!(chunk.request_id, RequestId::new(3));
            seq += 1;
            bytes += chunk.len();
        }

        assert_eq!(seq, 10);
        assert_eq!(bytes, 10_000);
    }

    #[tokio::test]
    async fn test_worker_matches_inline_producer() {
        let expected: Vec<DataChunk> = producer(5_000, 700).collect();

        let mut worker = ProducerWorker::spawn(producer(5_000, 700), 1);
        let mut actual = Vec::new();
        while let Some(chunk) = worker.recv().await {
            actual.push(chunk);
        }

        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_worker_is_bounded() {
        let mut worker = ProducerWorker::spawn(producer(1_000_000, 1_000), 3);

        // Let the producer fill the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let released = worker.cancel().await;
        assert!(released <= 3, "released {released} chunks");
    }

    #[tokio::test]
    async fn test_cancel_halts_production() {
        let mut worker = ProducerWorker::spawn(producer(1_000_000, 1_000), 4);

        let first = worker.recv().await.expect("first chunk");
        assert_eq!(first.seq, 0);

        worker.cancel().await;
        assert!(worker.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_finishes_immediately() {
        let mut worker = ProducerWorker::spawn(producer(0, 1_000), 4);
        assert!(worker.recv().await.is_none());
    }
}
