//! Kafka event producer.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::debug;

use crate::config::KafkaConfig;
use crate::error::EventError;
use crate::message::{TransactionEventMessage, WebhookEventMessage};

/// Send timeout per publish call.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Idempotent producer for both relay topics.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl EventProducer {
    /// Create a producer with idempotent sends and bounded client-side
    /// retry (3 attempts, 1 s backoff).
    pub fn new(config: KafkaConfig) -> Result<Self, EventError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", "true")
            .set("retries", "3")
            .set("retry.backoff.ms", "1000")
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                broker: config.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Event producer created"
        );

        Ok(Self { producer, config })
    }

    /// Publish a transaction lifecycle event, keyed by transaction id.
    pub async fn publish_transaction_event(
        &self,
        message: &TransactionEventMessage,
    ) -> Result<(), EventError> {
        let payload = message.to_json_bytes()?;
        self.send(&self.config.transaction_topic, &message.partition_key(), &payload)
            .await
    }

    /// Publish a webhook delivery event, keyed by subscription id.
    pub async fn publish_webhook_event(
        &self,
        message: &WebhookEventMessage,
    ) -> Result<(), EventError> {
        let payload = message.to_json_bytes()?;
        self.send(&self.config.webhook_topic, &message.partition_key(), &payload)
            .await
    }

    /// Publish pre-serialized bytes; used by the outbox relay.
    pub async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), EventError> {
        self.send(topic, key, payload).await
    }

    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), EventError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                topic: topic.to_string(),
                cause: err.to_string(),
            })?;

        debug!(
            topic = %topic,
            key = %key,
            partition,
            offset,
            "Event published"
        );

        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }
}
