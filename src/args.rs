//! CLI argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use sensor_kafka_producer::config::{DEFAULT_CLIENT_ID, DEFAULT_TOPIC};
use sensor_kafka_producer::{Acks, Compression, ProducerConfig, SaslMechanism, SecurityProtocol};

use crate::duration::parse_duration;

/// Simulate many sensors publishing log records to Kafka.
#[derive(Parser, Clone, Debug)]
#[command(name = "sensor-loadgen", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub kafka: KafkaArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(flatten)]
    pub load: LoadArgs,
}

/// Broker connection and authentication.
#[derive(Args, Clone, Debug)]
pub struct KafkaArgs {
    /// Kafka bootstrap servers (comma-separated, e.g., "localhost:9092")
    #[arg(long, env = "KAFKA_BOOTSTRAP")]
    pub brokers: Option<String>,

    /// Topic to publish to
    #[arg(long, env = "KAFKA_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Client id reported to the brokers
    #[arg(long, env = "KAFKA_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    #[arg(
        long,
        env = "KAFKA_SECURITY_PROTOCOL",
        value_enum,
        default_value_t = SecurityProtocol::SaslPlaintext
    )]
    pub security_protocol: SecurityProtocol,

    #[arg(
        long,
        env = "KAFKA_SASL_MECHANISM",
        value_enum,
        default_value_t = SaslMechanism::ScramSha512
    )]
    pub sasl_mechanism: SaslMechanism,

    /// SASL username
    #[arg(long, env = "SASL_USER")]
    pub username: Option<String>,

    /// SASL password
    #[arg(long, env = "SASL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Create the topic before the run if it does not exist
    #[arg(long)]
    pub create_topic: bool,

    /// Partitions for a topic created with --create-topic
    #[arg(long, default_value = "3")]
    pub partitions: i32,

    /// Replication factor for a topic created with --create-topic
    #[arg(long, default_value = "1")]
    pub replication_factor: i32,
}

/// Producer batching and buffering knobs.
#[derive(Args, Clone, Debug)]
pub struct TuningArgs {
    /// Max delay before a partial batch is sent (e.g., "10ms")
    #[arg(long, env = "KAFKA_LINGER", default_value = "10ms", value_parser = parse_duration)]
    pub linger: Duration,

    /// Batch size ceiling in bytes
    #[arg(long, env = "KAFKA_BATCH_BYTES", default_value = "65536")]
    pub max_batch_bytes: usize,

    #[arg(long, env = "KAFKA_COMPRESSION", value_enum, default_value_t = Compression::Lz4)]
    pub compression: Compression,

    #[arg(long, env = "KAFKA_ACKS", value_enum, default_value_t = Acks::Leader)]
    pub acks: Acks,

    /// Local buffer capacity in messages; beyond this, sends back off
    #[arg(long, env = "KAFKA_MAX_BUFFERED", default_value = "100000")]
    pub max_buffered_messages: usize,

    /// Upper bound on delivery time including retries
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub message_timeout: Duration,

    /// Pause after a send is refused because the local buffer is full
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub backpressure_wait: Duration,

    /// Bound on the shutdown flush; anything undelivered after this is dropped
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub flush_timeout: Duration,
}

/// Workload shape and reporting.
#[derive(Args, Clone, Debug)]
pub struct LoadArgs {
    /// Number of concurrent simulated sensors
    #[arg(long, short = 'u', default_value = "10")]
    pub users: usize,

    /// Sensors started per second during ramp-up
    #[arg(long, short = 'r', default_value = "10")]
    pub spawn_rate: f64,

    /// Interval between consecutive records from one sensor
    #[arg(long, default_value = "10ms", value_parser = parse_duration)]
    pub pacing: Duration,

    /// Stop after this long (e.g., "30s", "5m"); runs until Ctrl-C if omitted
    #[arg(long, short = 't', value_parser = parse_duration)]
    pub run_time: Option<Duration>,

    /// Interval between progress snapshots in the log
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub report_interval: Duration,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub metrics_output: Option<PathBuf>,

    /// Publish to an in-process buffer instead of Kafka
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Producer configuration described by the flags. Not validated.
    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            brokers: self.kafka.brokers.clone().unwrap_or_default(),
            topic: self.kafka.topic.clone(),
            client_id: self.kafka.client_id.clone(),
            security_protocol: self.kafka.security_protocol,
            sasl_mechanism: self.kafka.sasl_mechanism,
            username: self.kafka.username.clone(),
            password: self.kafka.password.clone(),
            linger: self.tuning.linger,
            max_batch_bytes: self.tuning.max_batch_bytes,
            compression: self.tuning.compression,
            acks: self.tuning.acks,
            max_buffered_messages: self.tuning.max_buffered_messages,
            message_timeout: self.tuning.message_timeout,
            backpressure_wait: self.tuning.backpressure_wait,
            flush_timeout: self.tuning.flush_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_to_producer_config() {
        let cli = Cli::try_parse_from([
            "sensor-loadgen",
            "--brokers",
            "kafka-1:9092,kafka-2:9092",
            "--username",
            "locust-user",
            "--password",
            "secret",
            "--security-protocol",
            "SASL_SSL",
            "--sasl-mechanism",
            "SCRAM-SHA-256",
            "--compression",
            "zstd",
            "--acks",
            "all",
            "--linger",
            "25ms",
            "--backpressure-wait",
            "50ms",
        ])
        .unwrap();

        let config = cli.producer_config();
        assert_eq!(config.brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.security_protocol, SecurityProtocol::SaslSsl);
        assert_eq!(config.sasl_mechanism, SaslMechanism::ScramSha256);
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.acks, Acks::All);
        assert_eq!(config.linger, Duration::from_millis(25));
        assert_eq!(config.backpressure_wait, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_producer_defaults() {
        let cli = Cli::try_parse_from(["sensor-loadgen", "--brokers", "localhost:9092"]).unwrap();
        let config = cli.producer_config();
        let defaults = ProducerConfig::default();

        assert_eq!(config.topic, defaults.topic);
        assert_eq!(config.client_id, defaults.client_id);
        assert_eq!(config.security_protocol, defaults.security_protocol);
        assert_eq!(config.sasl_mechanism, defaults.sasl_mechanism);
        assert_eq!(config.linger, defaults.linger);
        assert_eq!(config.max_batch_bytes, defaults.max_batch_bytes);
        assert_eq!(config.compression, defaults.compression);
        assert_eq!(config.acks, defaults.acks);
        assert_eq!(config.max_buffered_messages, defaults.max_buffered_messages);
        assert_eq!(config.flush_timeout, defaults.flush_timeout);

        assert_eq!(cli.load.users, 10);
        assert_eq!(cli.load.pacing, Duration::from_millis(10));
        assert_eq!(cli.load.run_time, None);
        assert!(!cli.load.dry_run);
    }

    #[test]
    fn test_acks_accepts_numeric_levels() {
        let cli = Cli::try_parse_from(["sensor-loadgen", "--acks", "0"]).unwrap();
        assert_eq!(cli.tuning.acks, Acks::None);
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        assert!(Cli::try_parse_from(["sensor-loadgen", "--pacing", "soon"]).is_err());
    }
}
