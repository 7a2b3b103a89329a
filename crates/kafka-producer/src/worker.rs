//! Per-device worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::publisher::BatchedPublisher;
use crate::record::LogRecord;

/// A simulated device. Holds nothing but the shared publisher.
#[derive(Clone)]
pub struct Worker {
    publisher: Arc<BatchedPublisher>,
}

impl Worker {
    pub fn new(publisher: Arc<BatchedPublisher>) -> Self {
        Self { publisher }
    }

    /// Emit one record and report any completions that are ready.
    pub async fn tick(&self) {
        let record = LogRecord::build();
        self.publisher.enqueue(&record).await;
        self.publisher.poll_nonblocking();
    }

    /// Tick with constant pacing until `cancel` fires. Returns the number of
    /// ticks completed.
    ///
    /// Ticks start `pacing` apart; a tick that overruns its slot is followed
    /// immediately by the next one rather than a burst of catch-up ticks.
    pub async fn run_paced(&self, pacing: Duration, cancel: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(pacing);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await;
            ticks += 1;
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AckMode, CollectingSink, MemoryTransport};
    use crate::outcome::OutcomeName;
    use crate::transport::completion_channel;

    fn worker(mode: AckMode) -> (Worker, Arc<CollectingSink>) {
        let (tx, rx) = completion_channel();
        let sink = Arc::new(CollectingSink::new());
        let publisher = BatchedPublisher::new(
            Box::new(MemoryTransport::new(tx, mode)),
            rx,
            sink.clone(),
            Duration::from_millis(10),
        );
        (Worker::new(Arc::new(publisher)), sink)
    }

    #[tokio::test]
    async fn test_tick_reports_ready_completions() {
        let (worker, sink) = worker(AckMode::Immediate);

        worker.tick().await;
        worker.tick().await;

        assert_eq!(sink.count(OutcomeName::ProduceOk), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paced_respects_interval_and_cancellation() {
        let (worker, sink) = worker(AckMode::Immediate);
        let cancel = CancellationToken::new();

        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run_paced(Duration::from_millis(10), cancel).await })
        };

        // First tick fires immediately, then one every 10ms.
        tokio::time::sleep(Duration::from_millis(95)).await;
        cancel.cancel();
        let ticks = handle.await.unwrap();

        assert_eq!(ticks, 10);
        assert_eq!(sink.count(OutcomeName::ProduceOk), 10);
    }
}
