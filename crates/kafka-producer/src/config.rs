//! Producer configuration.
//!
//! [`ProducerConfig`] is built once at startup by the caller and handed to the
//! transport and publisher. Nothing in this crate reads the process
//! environment.

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TOPIC: &str = "benchmark-logs";
pub const DEFAULT_CLIENT_ID: &str = "locust-benchmark";

/// Invalid or incomplete producer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// `security.protocol`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    #[value(name = "PLAINTEXT")]
    Plaintext,
    #[value(name = "SSL")]
    Ssl,
    #[value(name = "SASL_PLAINTEXT")]
    SaslPlaintext,
    #[value(name = "SASL_SSL")]
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

/// `sasl.mechanism`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SaslMechanism {
    #[value(name = "PLAIN")]
    #[serde(rename = "PLAIN")]
    Plain,
    #[value(name = "SCRAM-SHA-256")]
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[value(name = "SCRAM-SHA-512")]
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// `compression.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

/// `acks`: how many replicas must confirm before a delivery succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    #[value(name = "0")]
    None,
    #[value(name = "1")]
    Leader,
    All,
}

impl Acks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(SecurityProtocol, SaslMechanism, Compression, Acks);

/// Everything needed to build a transport and publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    pub topic: String,
    pub client_id: String,
    pub security_protocol: SecurityProtocol,
    pub sasl_mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Max delay before a partial batch is sent (`linger.ms`).
    pub linger: Duration,
    /// Batch size ceiling in bytes (`batch.size`).
    pub max_batch_bytes: usize,
    pub compression: Compression,
    pub acks: Acks,
    /// Local backpressure threshold (`queue.buffering.max.messages`).
    pub max_buffered_messages: usize,
    /// Upper bound on delivery time including retries (`message.timeout.ms`).
    pub message_timeout: Duration,

    /// How long `enqueue` pauses after hitting a full buffer.
    pub backpressure_wait: Duration,
    /// Bound on the shutdown flush.
    pub flush_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            security_protocol: SecurityProtocol::SaslPlaintext,
            sasl_mechanism: SaslMechanism::ScramSha512,
            username: None,
            password: None,
            linger: Duration::from_millis(10),
            max_batch_bytes: 65_536,
            compression: Compression::Lz4,
            acks: Acks::Leader,
            max_buffered_messages: 100_000,
            message_timeout: Duration::from_secs(30),
            backpressure_wait: Duration::from_millis(100),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

impl ProducerConfig {
    /// Check that every mandatory setting is present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(ConfigError::Missing("brokers"));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Missing("topic"));
        }
        if self.security_protocol.uses_sasl() {
            if self.username.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Missing("username"));
            }
            if self.password.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Missing("password"));
            }
        }
        if self.max_buffered_messages == 0 {
            return Err(ConfigError::Invalid {
                name: "max_buffered_messages",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "max_batch_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Translate into librdkafka client properties.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("security.protocol", self.security_protocol.as_str())
            .set("linger.ms", self.linger.as_millis().to_string())
            .set("batch.size", self.max_batch_bytes.to_string())
            .set("compression.type", self.compression.as_str())
            .set("acks", self.acks.as_str())
            .set(
                "queue.buffering.max.messages",
                self.max_buffered_messages.to_string(),
            )
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            );

        if self.security_protocol.uses_sasl() {
            config.set("sasl.mechanism", self.sasl_mechanism.as_str());
            if let Some(username) = &self.username {
                config.set("sasl.username", username);
            }
            if let Some(password) = &self.password {
                config.set("sasl.password", password);
            }
        }

        config
    }

    /// One-line description with the password masked, for startup logs.
    pub fn redacted(&self) -> String {
        format!(
            "brokers={} topic={} client_id={} protocol={} mechanism={} user={} password={} \
             linger={:?} batch_bytes={} compression={} acks={} max_buffered={}",
            self.brokers,
            self.topic,
            self.client_id,
            self.security_protocol,
            self.sasl_mechanism,
            self.username.as_deref().unwrap_or("-"),
            if self.password.is_some() { "***" } else { "-" },
            self.linger,
            self.max_batch_bytes,
            self.compression,
            self.acks,
            self.max_buffered_messages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sasl_config() -> ProducerConfig {
        ProducerConfig {
            brokers: "kafka:9092".to_string(),
            username: Some("locust-user".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_match_benchmark_tuning() {
        let config = ProducerConfig::default();

        assert_eq!(config.topic, "benchmark-logs");
        assert_eq!(config.linger, Duration::from_millis(10));
        assert_eq!(config.max_batch_bytes, 65_536);
        assert_eq!(config.compression, Compression::Lz4);
        assert_eq!(config.acks, Acks::Leader);
        assert_eq!(config.max_buffered_messages, 100_000);
        assert_eq!(config.backpressure_wait, Duration::from_millis(100));
        assert_eq!(config.flush_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_client_config_properties() {
        let config = sasl_config().client_config();

        assert_eq!(config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(config.get("security.protocol"), Some("SASL_PLAINTEXT"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("sasl.username"), Some("locust-user"));
        assert_eq!(config.get("sasl.password"), Some("secret"));
        assert_eq!(config.get("client.id"), Some("locust-benchmark"));
        assert_eq!(config.get("linger.ms"), Some("10"));
        assert_eq!(config.get("batch.size"), Some("65536"));
        assert_eq!(config.get("compression.type"), Some("lz4"));
        assert_eq!(config.get("acks"), Some("1"));
        assert_eq!(config.get("queue.buffering.max.messages"), Some("100000"));
    }

    #[test]
    fn test_plaintext_skips_sasl_properties() {
        let config = ProducerConfig {
            brokers: "localhost:9092".to_string(),
            security_protocol: SecurityProtocol::Plaintext,
            acks: Acks::All,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let client = config.client_config();
        assert_eq!(client.get("sasl.mechanism"), None);
        assert_eq!(client.get("acks"), Some("all"));
    }

    #[test]
    fn test_validate_requires_brokers_and_credentials() {
        assert_eq!(
            ProducerConfig::default().validate(),
            Err(ConfigError::Missing("brokers"))
        );

        let mut config = sasl_config();
        config.password = None;
        assert_eq!(config.validate(), Err(ConfigError::Missing("password")));

        config.password = Some("secret".to_string());
        config.username = Some(String::new());
        assert_eq!(config.validate(), Err(ConfigError::Missing("username")));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = ProducerConfig {
            max_buffered_messages: 0,
            ..sasl_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                name: "max_buffered_messages",
                ..
            })
        ));
    }

    #[test]
    fn test_redacted_hides_password() {
        let line = sasl_config().redacted();
        assert!(line.contains("password=***"));
        assert!(!line.contains("secret"));
    }
}
