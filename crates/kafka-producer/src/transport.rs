//! The seam between the publisher and whatever actually moves bytes.
//!
//! A [`Transport`] accepts [`OutboundMessage`]s into its own buffer and later
//! posts exactly one [`Completion`] per accepted message onto the completion
//! channel it was built with. The publisher never waits on the transport
//! except in [`Transport::flush`].

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

/// Per-message bookkeeping that travels with a message through the transport
/// and comes back in its [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTicket {
    /// Publisher-assigned sequence number, starting at 1.
    pub sequence: u64,
    /// Captured just before the message was handed to the transport.
    pub enqueued_at: Instant,
    /// Size of the serialized payload.
    pub byte_size: usize,
}

/// Serialized record plus its delivery ticket.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub ticket: DeliveryTicket,
}

impl OutboundMessage {
    pub fn new(sequence: u64, payload: Vec<u8>, enqueued_at: Instant) -> Self {
        let ticket = DeliveryTicket {
            sequence,
            enqueued_at,
            byte_size: payload.len(),
        };
        Self { payload, ticket }
    }
}

/// Raw delivery report posted by a transport.
#[derive(Debug, Clone)]
pub struct Completion {
    pub ticket: DeliveryTicket,
    /// When the transport learned the fate of the message.
    pub completed_at: Instant,
    /// `Err` carries the broker or network error text.
    pub result: Result<(), String>,
}

impl Completion {
    pub fn delivered(ticket: DeliveryTicket) -> Self {
        Self {
            ticket,
            completed_at: Instant::now(),
            result: Ok(()),
        }
    }

    pub fn failed(ticket: DeliveryTicket, reason: impl Into<String>) -> Self {
        Self {
            ticket,
            completed_at: Instant::now(),
            result: Err(reason.into()),
        }
    }

    /// Time between enqueue and completion.
    pub fn latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.ticket.enqueued_at)
    }
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// Create the queue transports post completions onto.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

/// Why a transport refused to take ownership of a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The local outbound buffer is at capacity.
    #[error("local send buffer is full")]
    QueueFull,

    /// Any other local refusal (oversized message, unknown topic, ...).
    #[error("message rejected by producer: {0}")]
    Rejected(String),
}

/// Errors surfaced by [`Transport::flush`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("flush timed out with {unresolved} message(s) still in flight")]
    FlushTimeout { unresolved: usize },

    #[error("flush failed: {0}")]
    Flush(String),
}

/// A buffered, asynchronous message sink.
///
/// Implementations must be safe to call from many threads at once.
pub trait Transport: Send + Sync {
    /// Hand a message to the local buffer without waiting for the network.
    fn send(&self, message: OutboundMessage) -> Result<(), SendError>;

    /// Wait up to `timeout` for every buffered message to be resolved.
    fn flush(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Messages accepted by [`Transport::send`] but not yet resolved.
    fn in_flight(&self) -> usize;
}
