//! Lock-free outcome counters for the run.

use std::sync::atomic::{AtomicU64, Ordering};

use sensor_kafka_producer::{OutcomeEvent, OutcomeName, OutcomeSink};
use serde::{Deserialize, Serialize};

/// Aggregates outcome events as they arrive. Shared by every worker through
/// the publisher's sink, so every update is a single atomic operation.
#[derive(Debug)]
pub struct OutcomeStats {
    counts: [AtomicU64; OutcomeName::ALL.len()],
    bytes: AtomicU64,
    latency_samples: AtomicU64,
    latency_sum_us: AtomicU64,
    latency_min_us: AtomicU64,
    latency_max_us: AtomicU64,
}

impl Default for OutcomeStats {
    fn default() -> Self {
        Self {
            counts: Default::default(),
            bytes: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_min_us: AtomicU64::new(u64::MAX),
            latency_max_us: AtomicU64::new(0),
        }
    }
}

impl OutcomeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let count = |name: OutcomeName| self.counts[name as usize].load(Ordering::Relaxed);
        let samples = self.latency_samples.load(Ordering::Relaxed);

        let latency = (samples > 0).then(|| {
            let sum_us = self.latency_sum_us.load(Ordering::Relaxed);
            LatencySummary {
                samples,
                avg_ms: sum_us as f64 / samples as f64 / 1000.0,
                min_ms: self.latency_min_us.load(Ordering::Relaxed) as f64 / 1000.0,
                max_ms: self.latency_max_us.load(Ordering::Relaxed) as f64 / 1000.0,
            }
        });

        StatsSnapshot {
            produce_ok: count(OutcomeName::ProduceOk),
            produce_error: count(OutcomeName::ProduceError),
            local_buffer_full: count(OutcomeName::LocalBufferFull),
            exception: count(OutcomeName::Exception),
            bytes: self.bytes.load(Ordering::Relaxed),
            latency,
        }
    }
}

impl OutcomeSink for OutcomeStats {
    fn record(&self, event: &OutcomeEvent) {
        self.counts[event.name as usize].fetch_add(1, Ordering::Relaxed);

        if let Some(bytes) = event.response_length {
            self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        }

        // Only broker round trips carry a meaningful latency.
        if matches!(
            event.name,
            OutcomeName::ProduceOk | OutcomeName::ProduceError
        ) {
            let micros = (event.response_time_ms * 1000.0).round().max(0.0) as u64;
            self.latency_samples.fetch_add(1, Ordering::Relaxed);
            self.latency_sum_us.fetch_add(micros, Ordering::Relaxed);
            self.latency_min_us.fetch_min(micros, Ordering::Relaxed);
            self.latency_max_us.fetch_max(micros, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`OutcomeStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub produce_ok: u64,
    pub produce_error: u64,
    pub local_buffer_full: u64,
    pub exception: u64,
    /// Payload bytes confirmed delivered
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
}

/// Delivery latency over successful and failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl StatsSnapshot {
    pub fn count(&self, name: OutcomeName) -> u64 {
        match name {
            OutcomeName::ProduceOk => self.produce_ok,
            OutcomeName::ProduceError => self.produce_error,
            OutcomeName::LocalBufferFull => self.local_buffer_full,
            OutcomeName::Exception => self.exception,
        }
    }

    pub fn total(&self) -> u64 {
        OutcomeName::ALL.iter().map(|name| self.count(*name)).sum()
    }

    pub fn errors(&self) -> u64 {
        self.total() - self.produce_ok
    }

    /// Counters accumulated since `earlier`. Latency is not differenced.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            produce_ok: self.produce_ok.saturating_sub(earlier.produce_ok),
            produce_error: self.produce_error.saturating_sub(earlier.produce_error),
            local_buffer_full: self
                .local_buffer_full
                .saturating_sub(earlier.local_buffer_full),
            exception: self.exception.saturating_sub(earlier.exception),
            bytes: self.bytes.saturating_sub(earlier.bytes),
            latency: self.latency,
        }
    }
}
