//! Error types for the harness.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur while talking to the broker or running a role.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Error from the librdkafka-backed client.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The broker could not be reached when a handle was constructed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A publish was rejected or timed out after the client connected.
    #[error("Delivery to topic '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    /// A background client task panicked or was aborted.
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The handle was already released.
    #[error("{0} is closed")]
    Closed(String),
}

impl HarnessError {
    pub(crate) fn delivery(topic: impl Into<String>, reason: impl ToString) -> Self {
        HarnessError::Delivery {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}
