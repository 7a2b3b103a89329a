//! In-process transport and sink.
//!
//! [`MemoryTransport`] stands in for a broker: it buffers messages up to a
//! fixed capacity and resolves them according to an [`AckMode`] and a set of
//! sequence positions that should fail. The binary uses it for `--dry-run`;
//! tests use it to drive the publisher deterministically.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::outcome::{OutcomeEvent, OutcomeName, OutcomeSink};
use crate::transport::{
    Completion, CompletionSender, DeliveryTicket, OutboundMessage, SendError, Transport,
    TransportError,
};

/// When a [`MemoryTransport`] resolves buffered messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Resolve each message as soon as it is sent; the buffer never fills.
    Immediate,
    /// Hold messages until `flush` or `complete_all`.
    OnFlush,
    /// Hold messages forever; `flush` always times out.
    Never,
}

#[derive(Default)]
struct Buffer {
    /// Unresolved tickets with their 1-based acceptance position.
    pending: VecDeque<(u64, DeliveryTicket)>,
    accepted: u64,
}

pub struct MemoryTransport {
    completions: CompletionSender,
    capacity: usize,
    mode: AckMode,
    failing_positions: BTreeSet<u64>,
    failure_reason: String,
    buffer: Mutex<Buffer>,
    rejected: AtomicU64,
}

impl MemoryTransport {
    pub fn new(completions: CompletionSender, mode: AckMode) -> Self {
        Self {
            completions,
            capacity: usize::MAX,
            mode,
            failing_positions: BTreeSet::new(),
            failure_reason: "Broker: Message rejected".to_string(),
            buffer: Mutex::new(Buffer::default()),
            rejected: AtomicU64::new(0),
        }
    }

    /// Limit how many unresolved messages may be buffered at once.
    /// A capacity of zero rejects every send.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Fail the message that is the `position`-th (1-based) to be accepted.
    pub fn fail_message(mut self, position: u64) -> Self {
        self.failing_positions.insert(position);
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = reason.into();
        self
    }

    /// Total messages accepted into the buffer so far.
    pub fn accepted(&self) -> u64 {
        self.lock().accepted
    }

    /// Sends refused because the buffer was full.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Resolve every buffered message now, oldest first.
    pub fn complete_all(&self) -> usize {
        let drained: Vec<(u64, DeliveryTicket)> = self.lock().pending.drain(..).collect();
        let count = drained.len();
        for (position, ticket) in drained {
            self.resolve(position, ticket);
        }
        count
    }

    fn resolve(&self, position: u64, ticket: DeliveryTicket) {
        let completion = if self.failing_positions.contains(&position) {
            Completion::failed(ticket, self.failure_reason.clone())
        } else {
            Completion::delivered(ticket)
        };
        // The receiver is gone once the publisher is dropped; nothing left to tell.
        let _ = self.completions.send(completion);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        let position = {
            let mut buffer = self.lock();
            if buffer.pending.len() >= self.capacity {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(SendError::QueueFull);
            }
            buffer.accepted += 1;
            let position = buffer.accepted;
            if self.mode != AckMode::Immediate {
                buffer.pending.push_back((position, message.ticket));
                return Ok(());
            }
            position
        };
        self.resolve(position, message.ticket);
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
        match self.mode {
            AckMode::Immediate | AckMode::OnFlush => {
                self.complete_all();
                Ok(())
            }
            AckMode::Never => {
                if self.in_flight() == 0 {
                    return Ok(());
                }
                std::thread::sleep(timeout);
                Err(TransportError::FlushTimeout {
                    unresolved: self.in_flight(),
                })
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Sink that keeps every event, in arrival order.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<OutcomeEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutcomeEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, name: OutcomeName) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| event.name == name)
            .count()
    }
}

impl OutcomeSink for CollectingSink {
    fn record(&self, event: &OutcomeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::completion_channel;
    use std::time::Instant;

    fn message(sequence: u64) -> OutboundMessage {
        OutboundMessage::new(sequence, vec![b'x'; 16], Instant::now())
    }

    #[test]
    fn test_immediate_mode_resolves_on_send() {
        let (tx, mut rx) = completion_channel();
        let transport = MemoryTransport::new(tx, AckMode::Immediate);

        transport.send(message(1)).unwrap();
        transport.send(message(2)).unwrap();

        assert_eq!(transport.in_flight(), 0);
        assert_eq!(rx.try_recv().unwrap().ticket.sequence, 1);
        assert_eq!(rx.try_recv().unwrap().ticket.sequence, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capacity_rejects_when_full() {
        let (tx, _rx) = completion_channel();
        let transport = MemoryTransport::new(tx, AckMode::OnFlush).with_capacity(2);

        assert!(transport.send(message(1)).is_ok());
        assert!(transport.send(message(2)).is_ok());
        assert_eq!(transport.send(message(3)), Err(SendError::QueueFull));
        assert_eq!(transport.rejected(), 1);
        assert_eq!(transport.accepted(), 2);

        transport.complete_all();
        assert!(transport.send(message(4)).is_ok());
    }

    #[test]
    fn test_failure_plan_targets_acceptance_position() {
        let (tx, mut rx) = completion_channel();
        let transport = MemoryTransport::new(tx, AckMode::OnFlush)
            .with_capacity(1)
            .fail_message(2)
            .with_failure_reason("Broker: Leader not available");

        transport.send(message(1)).unwrap();
        // Refused sends do not take a position.
        assert!(transport.send(message(2)).is_err());
        transport.complete_all();
        transport.send(message(3)).unwrap();
        transport.flush(Duration::from_secs(1)).unwrap();

        assert!(rx.try_recv().unwrap().result.is_ok());
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.ticket.sequence, 3);
        assert_eq!(failed.result, Err("Broker: Leader not available".to_string()));
    }

    #[test]
    fn test_never_mode_flush_times_out() {
        let (tx, _rx) = completion_channel();
        let transport = MemoryTransport::new(tx, AckMode::Never);
        assert!(transport.flush(Duration::from_secs(10)).is_ok());

        transport.send(message(1)).unwrap();
        let started = Instant::now();
        let result = transport.flush(Duration::from_millis(50));

        assert_eq!(result, Err(TransportError::FlushTimeout { unresolved: 1 }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
