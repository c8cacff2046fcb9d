//! Kafka connection and topic configuration.

use std::env;

use crate::error::EventError;

/// Default topic for transaction lifecycle events.
pub const TRANSACTION_TOPIC: &str = "transaction-events";
/// Default topic for per-subscription webhook delivery events.
pub const WEBHOOK_TOPIC: &str = "webhook-events";

/// Kafka connection configuration.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap_servers: String,
    /// Client identifier.
    pub client_id: String,
    /// Consumer group prefix; each consumer appends its role.
    pub consumer_group: String,
    /// Topic carrying transaction lifecycle events.
    pub transaction_topic: String,
    /// Topic carrying webhook delivery events.
    pub webhook_topic: String,
}

impl KafkaConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `KAFKA_BOOTSTRAP_SERVERS`.
    /// Optional: `KAFKA_CLIENT_ID`, `KAFKA_CONSUMER_GROUP`,
    /// `KAFKA_TRANSACTION_TOPIC`, `KAFKA_WEBHOOK_TOPIC`.
    pub fn from_env() -> Result<Self, EventError> {
        let bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").map_err(|_| EventError::ConfigMissing {
                var: "KAFKA_BOOTSTRAP_SERVERS".to_string(),
            })?;

        Ok(Self {
            bootstrap_servers,
            client_id: env::var("KAFKA_CLIENT_ID").unwrap_or_else(|_| "relay".to_string()),
            consumer_group: env::var("KAFKA_CONSUMER_GROUP")
                .unwrap_or_else(|_| "relay".to_string()),
            transaction_topic: env::var("KAFKA_TRANSACTION_TOPIC")
                .unwrap_or_else(|_| TRANSACTION_TOPIC.to_string()),
            webhook_topic: env::var("KAFKA_WEBHOOK_TOPIC")
                .unwrap_or_else(|_| WEBHOOK_TOPIC.to_string()),
        })
    }

    /// Configuration with defaults for everything but the broker list.
    #[must_use]
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: "relay".to_string(),
            consumer_group: "relay".to_string(),
            transaction_topic: TRANSACTION_TOPIC.to_string(),
            webhook_topic: WEBHOOK_TOPIC.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KafkaConfig::new("localhost:9092");
        assert_eq!(config.transaction_topic, "transaction-events");
        assert_eq!(config.webhook_topic, "webhook-events");
        assert_eq!(config.consumer_group, "relay");
    }
}
