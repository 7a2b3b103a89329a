//! Delivery outcomes and the sinks they are reported to.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::transport::Completion;

/// Request type tag attached to every outcome event.
pub const REQUEST_TYPE: &str = "KAFKA";

/// What happened to one publish attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The broker acknowledged the message.
    Success { latency_ms: f64, byte_size: usize },
    /// The broker or network rejected the message after it was buffered.
    Failure { latency_ms: f64, reason: String },
    /// The local send buffer was saturated; nothing was sent.
    LocalBufferFull,
    /// Something went wrong before the message reached the buffer.
    UnexpectedError { reason: String },
}

impl DeliveryOutcome {
    /// Classify a raw transport completion.
    pub fn from_completion(completion: &Completion) -> Self {
        let latency_ms = completion.latency().as_secs_f64() * 1000.0;
        match &completion.result {
            Ok(()) => DeliveryOutcome::Success {
                latency_ms,
                byte_size: completion.ticket.byte_size,
            },
            Err(reason) => DeliveryOutcome::Failure {
                latency_ms,
                reason: reason.clone(),
            },
        }
    }

    pub fn name(&self) -> OutcomeName {
        match self {
            DeliveryOutcome::Success { .. } => OutcomeName::ProduceOk,
            DeliveryOutcome::Failure { .. } => OutcomeName::ProduceError,
            DeliveryOutcome::LocalBufferFull => OutcomeName::LocalBufferFull,
            DeliveryOutcome::UnexpectedError { .. } => OutcomeName::Exception,
        }
    }

    /// Latency in milliseconds; zero when no network attempt took place.
    pub fn latency_ms(&self) -> f64 {
        match self {
            DeliveryOutcome::Success { latency_ms, .. }
            | DeliveryOutcome::Failure { latency_ms, .. } => *latency_ms,
            DeliveryOutcome::LocalBufferFull | DeliveryOutcome::UnexpectedError { .. } => 0.0,
        }
    }
}

/// The fixed set of outcome names seen by metrics consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeName {
    ProduceOk,
    ProduceError,
    LocalBufferFull,
    Exception,
}

impl OutcomeName {
    pub const ALL: [OutcomeName; 4] = [
        OutcomeName::ProduceOk,
        OutcomeName::ProduceError,
        OutcomeName::LocalBufferFull,
        OutcomeName::Exception,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeName::ProduceOk => "produce_ok",
            OutcomeName::ProduceError => "produce_error",
            OutcomeName::LocalBufferFull => "local_buffer_full",
            OutcomeName::Exception => "exception",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, OutcomeName::ProduceOk)
    }
}

impl fmt::Display for OutcomeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical event shape handed to metrics sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub request_type: String,
    pub name: OutcomeName,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DeliveryOutcome> for OutcomeEvent {
    fn from(outcome: &DeliveryOutcome) -> Self {
        let (response_length, error) = match outcome {
            DeliveryOutcome::Success { byte_size, .. } => (Some(*byte_size), None),
            DeliveryOutcome::Failure { reason, .. }
            | DeliveryOutcome::UnexpectedError { reason } => (None, Some(reason.clone())),
            DeliveryOutcome::LocalBufferFull => (None, Some("Buffer Full".to_string())),
        };
        Self {
            request_type: REQUEST_TYPE.to_string(),
            name: outcome.name(),
            response_time_ms: outcome.latency_ms(),
            response_length,
            error,
        }
    }
}

/// Consumer of outcome events.
///
/// Called from worker tasks and from whichever thread drains completions, so
/// implementations must be cheap and thread-safe.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, event: &OutcomeEvent);
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl OutcomeSink for FanoutSink {
    fn record(&self, event: &OutcomeEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

/// Logs each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record(&self, event: &OutcomeEvent) {
        match event.name {
            OutcomeName::ProduceOk => tracing::trace!(
                latency_ms = event.response_time_ms,
                bytes = event.response_length,
                "produce_ok"
            ),
            OutcomeName::LocalBufferFull => tracing::debug!("local_buffer_full"),
            name => tracing::warn!(
                outcome = %name,
                latency_ms = event.response_time_ms,
                error = event.error.as_deref().unwrap_or(""),
                "publish failed"
            ),
        }
    }
}

/// Turns outcomes into events and forwards them to a sink. Never retries.
#[derive(Clone)]
pub struct DeliveryReporter {
    sink: Arc<dyn OutcomeSink>,
}

impl DeliveryReporter {
    pub fn new(sink: Arc<dyn OutcomeSink>) -> Self {
        Self { sink }
    }

    pub fn report(&self, outcome: &DeliveryOutcome) {
        self.sink.record(&OutcomeEvent::from(outcome));
    }

    pub fn report_completion(&self, completion: &Completion) -> DeliveryOutcome {
        let outcome = DeliveryOutcome::from_completion(completion);
        self.report(&outcome);
        outcome
    }
}
