//! Error types for the event transport.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Missing configuration: {var}")]
    ConfigMissing { var: String },

    #[error("Invalid configuration for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    #[error("Failed to connect to broker {broker}: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    #[error("Failed to publish to {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Consumer error: {cause}")]
    ConsumeFailed { cause: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
