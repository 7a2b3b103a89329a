//! librdkafka-backed transport.
//!
//! Messages go into a [`ThreadedProducer`], whose background thread batches,
//! compresses and ships them, then invokes [`DeliveryContext::delivery`] once
//! per message. The context turns that callback into a [`Completion`] on the
//! completion channel, so nothing on the worker side ever waits for the
//! network.

use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;
use tracing::{debug, info};

use crate::config::ProducerConfig;
use crate::error::{PublisherError, Result};
use crate::transport::{
    Completion, CompletionSender, DeliveryTicket, OutboundMessage, SendError, Transport,
    TransportError,
};

/// Producer context that forwards delivery reports to the completion channel.
pub struct DeliveryContext {
    completions: CompletionSender,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<DeliveryTicket>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, ticket: Self::DeliveryOpaque) {
        let completion = match delivery_result {
            Ok(_) => Completion::delivered(*ticket),
            Err((err, _)) => Completion::failed(*ticket, err.to_string()),
        };
        // A closed channel means the publisher is gone and nobody is counting.
        let _ = self.completions.send(completion);
    }
}

/// [`Transport`] over a librdkafka producer.
pub struct KafkaTransport {
    producer: ThreadedProducer<DeliveryContext>,
    topic: String,
}

impl KafkaTransport {
    /// Create the producer. Fails on invalid configuration; does not contact
    /// the brokers.
    pub fn new(config: &ProducerConfig, completions: CompletionSender) -> Result<Self> {
        config.validate()?;

        let producer: ThreadedProducer<DeliveryContext> = config
            .client_config()
            .create_with_context(DeliveryContext { completions })?;

        info!("Created Kafka producer: {}", config.redacted());

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

impl Transport for KafkaTransport {
    fn send(&self, message: OutboundMessage) -> std::result::Result<(), SendError> {
        let record: BaseRecord<'_, (), [u8], Box<DeliveryTicket>> =
            BaseRecord::with_opaque_to(&self.topic, Box::new(message.ticket))
                .payload(message.payload.as_slice());

        self.producer.send(record).map_err(|(err, _)| match err {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => SendError::QueueFull,
            other => SendError::Rejected(other.to_string()),
        })
    }

    fn flush(&self, timeout: Duration) -> std::result::Result<(), TransportError> {
        match self.producer.flush(timeout) {
            Ok(()) => Ok(()),
            Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut)) => {
                Err(TransportError::FlushTimeout {
                    unresolved: self.in_flight(),
                })
            }
            Err(e) => Err(TransportError::Flush(e.to_string())),
        }
    }

    fn in_flight(&self) -> usize {
        usize::try_from(self.producer.in_flight_count()).unwrap_or(0)
    }
}

/// Create the configured topic if it does not exist yet.
pub async fn create_topic_if_not_exists(
    config: &ProducerConfig,
    partitions: i32,
    replication_factor: i32,
) -> Result<()> {
    config.validate()?;

    let admin_client: AdminClient<DefaultClientContext> = config.client_config().create()?;

    let new_topic = NewTopic::new(
        &config.topic,
        partitions,
        TopicReplication::Fixed(replication_factor),
    );
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

    let results = admin_client
        .create_topics(&[new_topic], &opts)
        .await
        .map_err(|e| PublisherError::TopicCreation(format!("Failed to create topics: {e}")))?;

    for result in results {
        match result {
            Ok(topic_name) => info!("Topic '{topic_name}' created successfully"),
            Err((topic_name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!("Topic '{topic_name}' already exists");
            }
            Err((topic_name, err)) => {
                return Err(PublisherError::TopicCreation(format!(
                    "Failed to create topic {topic_name}: {err}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityProtocol;
    use crate::transport::completion_channel;

    #[test]
    fn test_new_rejects_invalid_config() {
        let (tx, _rx) = completion_channel();
        let config = ProducerConfig::default();

        let err = KafkaTransport::new(&config, tx).err().unwrap();
        assert!(matches!(err, PublisherError::Config(_)));
    }

    #[test]
    fn test_new_does_not_need_a_reachable_broker() {
        let (tx, _rx) = completion_channel();
        let config = ProducerConfig {
            brokers: "127.0.0.1:1".to_string(),
            security_protocol: SecurityProtocol::Plaintext,
            ..Default::default()
        };

        let transport = KafkaTransport::new(&config, tx).unwrap();
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_full_queue_and_flush_timeout_without_broker() {
        let (tx, _rx) = completion_channel();
        let config = ProducerConfig {
            brokers: "127.0.0.1:1".to_string(),
            security_protocol: SecurityProtocol::Plaintext,
            max_buffered_messages: 1,
            ..Default::default()
        };
        let transport = KafkaTransport::new(&config, tx).unwrap();
        let message = |sequence| {
            OutboundMessage::new(
                sequence,
                b"{\"sensor_id\":1}".to_vec(),
                std::time::Instant::now(),
            )
        };

        assert_eq!(transport.send(message(1)), Ok(()));
        assert_eq!(transport.send(message(2)), Err(SendError::QueueFull));
        assert_eq!(transport.in_flight(), 1);

        let timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();
        let result = transport.flush(timeout);

        assert_eq!(result, Err(TransportError::FlushTimeout { unresolved: 1 }));
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }
}
