//! Batched asynchronous Kafka publishing for sensor-loadgen.
//!
//! Many simulated devices share one non-blocking publisher. Each device
//! builds a [`LogRecord`], hands it to [`BatchedPublisher::enqueue`] and then
//! calls [`BatchedPublisher::poll_nonblocking`] to report whatever deliveries
//! have completed in the meantime.
//!
//! ## Pipeline
//!
//! ```text
//! Worker ──build──▶ LogRecord ──enqueue──▶ BatchedPublisher ──send──▶ Transport
//!                                               ▲                       │
//!                                               │            (batching, network,
//!                                       poll_nonblocking        acknowledgements)
//!                                               │                       │
//!                                        completion channel ◀──delivery─┘
//!                                               │
//!                                               ▼
//!                                      DeliveryReporter ──▶ OutcomeSink
//! ```
//!
//! - **Backpressure**: when the transport's local buffer is full, `enqueue`
//!   reports `local_buffer_full` and pauses for a bounded interval instead of
//!   failing.
//! - **Accounting**: every buffered message yields exactly one outcome, or is
//!   counted as unresolved when the shutdown flush times out.
//! - **Lifecycle**: [`PublisherLifecycle`] builds the publisher once on the
//!   first worker start and flushes it, bounded, when the last worker stops.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensor_kafka_producer::{
//!     BatchedPublisher, ProducerConfig, PublisherLifecycle, TracingSink, Worker,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProducerConfig {
//!         brokers: "localhost:9092".to_string(),
//!         username: Some("locust-user".to_string()),
//!         password: Some("secret".to_string()),
//!         ..Default::default()
//!     };
//!     let flush_timeout = config.flush_timeout;
//!     let lifecycle = PublisherLifecycle::new(
//!         Box::new(move || BatchedPublisher::kafka(&config, Arc::new(TracingSink))),
//!         flush_timeout,
//!     );
//!
//!     let worker = Worker::new(lifecycle.start().await?);
//!     worker.tick().await;
//!     lifecycle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod kafka;
pub mod lifecycle;
pub mod memory;
pub mod outcome;
pub mod publisher;
pub mod record;
pub mod transport;
pub mod worker;

pub use config::{
    Acks, Compression, ConfigError, ProducerConfig, SaslMechanism, SecurityProtocol,
};
pub use error::{PublisherError, Result};
pub use kafka::{create_topic_if_not_exists, KafkaTransport};
pub use lifecycle::{LifecycleError, Phase, PublisherFactory, PublisherLifecycle};
pub use memory::{AckMode, CollectingSink, MemoryTransport};
pub use outcome::{
    DeliveryOutcome, DeliveryReporter, FanoutSink, OutcomeEvent, OutcomeName, OutcomeSink,
    TracingSink, REQUEST_TYPE,
};
pub use publisher::{BatchedPublisher, FlushReport, PublisherStats};
pub use record::LogRecord;
pub use transport::{
    completion_channel, Completion, CompletionReceiver, CompletionSender, DeliveryTicket,
    OutboundMessage, SendError, Transport, TransportError,
};
pub use worker::Worker;
