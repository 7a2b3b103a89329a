//! The batched asynchronous publisher.
//!
//! [`BatchedPublisher`] is shared by every worker. `enqueue` serializes a
//! record and hands it to the transport's buffer without waiting on the
//! network; batching, compression and acknowledgements happen inside the
//! transport. Delivery reports come back on a completion channel and are
//! turned into outcomes by `poll_nonblocking`.
//!
//! Every failure path ends in a reported outcome. Nothing here returns an
//! error to the caller of `enqueue`.
//!
//! # Accounting
//!
//! Each message accepted by the transport produces exactly one completion.
//! `buffered - resolved` is the number of outcomes still owed. After a flush
//! that timed out, whatever is still owed is abandoned and shows up in
//! [`FlushReport::unresolved`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::error::Result;
use crate::kafka::KafkaTransport;
use crate::memory::{AckMode, MemoryTransport};
use crate::outcome::{DeliveryOutcome, DeliveryReporter, OutcomeSink};
use crate::transport::{
    completion_channel, CompletionReceiver, OutboundMessage, SendError, Transport, TransportError,
};

/// Counters describing the publisher's lifetime so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    /// Messages accepted into the transport buffer.
    pub buffered: u64,
    /// Completions drained and reported.
    pub resolved: u64,
    /// Sends refused because the local buffer was full.
    pub buffer_full: u64,
    /// Messages that never reached the buffer for any other reason.
    pub unexpected: u64,
}

impl PublisherStats {
    /// Outcomes still owed for buffered messages.
    pub fn pending(&self) -> u64 {
        self.buffered.saturating_sub(self.resolved)
    }
}

/// Result of a bounded shutdown flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Buffered messages whose outcome was never observed.
    pub unresolved: u64,
    pub timed_out: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

pub struct BatchedPublisher {
    transport: Box<dyn Transport>,
    completions: Mutex<CompletionReceiver>,
    reporter: DeliveryReporter,
    backpressure_wait: Duration,
    next_sequence: AtomicU64,
    buffered: AtomicU64,
    resolved: AtomicU64,
    buffer_full: AtomicU64,
    unexpected: AtomicU64,
}

impl BatchedPublisher {
    /// Wrap an already-built transport. `completions` must be the receiving
    /// half of the channel the transport posts to.
    pub fn new(
        transport: Box<dyn Transport>,
        completions: CompletionReceiver,
        sink: Arc<dyn OutcomeSink>,
        backpressure_wait: Duration,
    ) -> Self {
        Self {
            transport,
            completions: Mutex::new(completions),
            reporter: DeliveryReporter::new(sink),
            backpressure_wait,
            next_sequence: AtomicU64::new(1),
            buffered: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            buffer_full: AtomicU64::new(0),
            unexpected: AtomicU64::new(0),
        }
    }

    /// Publisher backed by a librdkafka producer.
    pub fn kafka(config: &ProducerConfig, sink: Arc<dyn OutcomeSink>) -> Result<Self> {
        let (tx, rx) = completion_channel();
        let transport = KafkaTransport::new(config, tx)?;
        Ok(Self::new(
            Box::new(transport),
            rx,
            sink,
            config.backpressure_wait,
        ))
    }

    /// Publisher that acknowledges everything in-process, for dry runs.
    pub fn in_memory(config: &ProducerConfig, sink: Arc<dyn OutcomeSink>) -> Self {
        let (tx, rx) = completion_channel();
        let transport = MemoryTransport::new(tx, AckMode::Immediate)
            .with_capacity(config.max_buffered_messages);
        Self::new(Box::new(transport), rx, sink, config.backpressure_wait)
    }

    /// Serialize `record` and place it in the outbound buffer.
    ///
    /// Returns as soon as the transport has taken the message. When the local
    /// buffer is full, reports `LocalBufferFull` and pauses for the configured
    /// backpressure wait before returning. Never fails.
    pub async fn enqueue<R: Serialize + ?Sized>(&self, record: &R) {
        let enqueued_at = Instant::now();
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                self.report_unexpected(format!("Failed to serialize record: {e}"));
                return;
            }
        };

        match self.send_payload(payload, enqueued_at) {
            Ok(()) => {}
            Err(SendError::QueueFull) => {
                self.buffer_full.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(&DeliveryOutcome::LocalBufferFull);
                tokio::time::sleep(self.backpressure_wait).await;
                self.poll_nonblocking();
            }
            Err(SendError::Rejected(reason)) => self.report_unexpected(reason),
        }
    }

    fn send_payload(
        &self,
        payload: Vec<u8>,
        enqueued_at: Instant,
    ) -> std::result::Result<(), SendError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // Counted before the send so a transport that completes inline can
        // never make `resolved` overtake `buffered`.
        self.buffered.fetch_add(1, Ordering::Relaxed);
        let sent = self
            .transport
            .send(OutboundMessage::new(sequence, payload, enqueued_at));
        if sent.is_err() {
            self.buffered.fetch_sub(1, Ordering::Relaxed);
        }
        sent
    }

    fn report_unexpected(&self, reason: String) {
        self.unexpected.fetch_add(1, Ordering::Relaxed);
        self.reporter
            .report(&DeliveryOutcome::UnexpectedError { reason });
    }

    /// Report every completion that is ready right now. Returns how many were
    /// drained. Never waits; if another caller is already draining, returns 0.
    pub fn poll_nonblocking(&self) -> usize {
        let Ok(mut completions) = self.completions.try_lock() else {
            return 0;
        };

        let mut drained = 0;
        while let Ok(completion) = completions.try_recv() {
            self.reporter.report_completion(&completion);
            drained += 1;
        }
        self.resolved.fetch_add(drained as u64, Ordering::Relaxed);
        drained
    }

    /// Block for up to `timeout` while the transport drains its buffer, then
    /// report whatever completed. Messages still unresolved afterwards are
    /// abandoned.
    pub fn flush(&self, timeout: Duration) -> FlushReport {
        let started = Instant::now();
        info!(
            "Flushing {} buffered message(s) (timeout {:?})",
            self.transport.in_flight(),
            timeout
        );

        let result = self.transport.flush(timeout);
        self.drain_blocking();

        let unresolved = self.stats().pending();
        let timed_out = match result {
            Ok(()) => false,
            Err(TransportError::FlushTimeout { .. }) => true,
            Err(e) => {
                warn!("{e}");
                unresolved > 0
            }
        };

        if unresolved > 0 {
            warn!("Abandoning {unresolved} unflushed message(s) after {timeout:?}");
        } else {
            debug!("Flush complete in {:?}", started.elapsed());
        }

        FlushReport {
            unresolved,
            timed_out,
            elapsed: started.elapsed(),
        }
    }

    /// Like `poll_nonblocking`, but waits for a concurrent drainer to finish
    /// so the flush accounting sees every completion already posted.
    fn drain_blocking(&self) {
        let mut completions = self
            .completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut drained = 0u64;
        while let Ok(completion) = completions.try_recv() {
            self.reporter.report_completion(&completion);
            drained += 1;
        }
        self.resolved.fetch_add(drained, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            buffered: self.buffered.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            buffer_full: self.buffer_full.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
        }
    }

    /// Messages the transport currently holds unresolved.
    pub fn in_flight(&self) -> usize {
        self.transport.in_flight()
    }
}
