//! Error types for building and running the publishing pipeline.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while constructing a publisher or its transport.
///
/// Publishing itself never returns these; per-message problems become
/// delivery outcomes instead.
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Topic creation error: {0}")]
    TopicCreation(String),
}

pub type Result<T> = std::result::Result<T, PublisherError>;
