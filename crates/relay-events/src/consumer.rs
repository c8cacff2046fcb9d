//! Kafka consumer loop.
//!
//! Offsets are committed only after the handler returns Ok, so a crash
//! mid-processing replays the message. Handlers must therefore be
//! idempotent; the database guards in `relay_db` provide that.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::error::EventError;

/// Handler for raw message payloads from one topic.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. Returning Err leaves the offset
    /// uncommitted so the message is redelivered.
    async fn handle(&self, payload: &[u8]) -> Result<(), EventError>;
}

/// Build a consumer subscribed to `topic` under `group_suffix`.
pub fn build_consumer(
    config: &KafkaConfig,
    topic: &str,
    group_suffix: &str,
) -> Result<StreamConsumer, EventError> {
    let group_id = format!("{}-{}", config.consumer_group, group_suffix);
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("client.id", &config.client_id)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "10000")
        .create()
        .map_err(|e| EventError::ConnectionFailed {
            broker: config.bootstrap_servers.clone(),
            cause: e.to_string(),
        })?;

    consumer
        .subscribe(&[topic])
        .map_err(|e| EventError::ConsumeFailed { cause: e.to_string() })?;

    info!(topic = %topic, group_id = %group_id, "Consumer subscribed");

    Ok(consumer)
}

/// Poll loop: receive, hand to `handler`, commit on success.
pub async fn run_consumer<H: MessageHandler>(
    consumer: StreamConsumer,
    handler: H,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Consumer shutting down");
                break;
            }
            result = consumer.recv() => {
                match result {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            warn!(
                                topic = message.topic(),
                                offset = message.offset(),
                                "Skipping message with empty payload"
                            );
                            let _ = consumer.commit_message(&message, CommitMode::Async);
                            continue;
                        };

                        match handler.handle(payload).await {
                            Ok(()) => {
                                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                    error!(error = %e, "Failed to commit offset");
                                }
                            }
                            Err(e) => {
                                // Leave uncommitted; the message will be
                                // redelivered after the session rebalances.
                                error!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Handler failed; offset not committed"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Consumer poll error");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
