//! Outbox relay.
//!
//! Services write events into `outbox_events` inside the same database
//! transaction as the entity change; this task drains unpublished rows
//! onto the bus in insertion order. A row is stamped only after the
//! broker acknowledges the send, so a crash between the two re-sends
//! the event — consumers dedupe.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use relay_db::models::OutboxEvent;

use crate::producer::EventProducer;

/// Rows drained per tick.
const DRAIN_BATCH_SIZE: i64 = 100;

/// Periodic task that publishes outbox rows to Kafka.
pub struct OutboxRelay {
    pool: PgPool,
    producer: EventProducer,
    poll_interval: Duration,
}

impl OutboxRelay {
    #[must_use]
    pub fn new(pool: PgPool, producer: EventProducer, poll_interval: Duration) -> Self {
        Self {
            pool,
            producer,
            poll_interval,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        info!("Outbox relay started");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Outbox relay shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.drain_once().await;
                }
            }
        }
    }

    /// Publish one batch. Stops at the first failure so ordering per
    /// partition key is preserved across ticks.
    pub async fn drain_once(&self) {
        let batch = match OutboxEvent::fetch_unpublished(&self.pool, DRAIN_BATCH_SIZE).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to read outbox");
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        debug!(count = batch.len(), "Draining outbox");

        for event in batch {
            let payload = match serde_json::to_vec(&event.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(outbox_id = event.id, error = %e, "Unserializable outbox row");
                    return;
                }
            };

            if let Err(e) = self
                .producer
                .publish_raw(&event.topic, &event.partition_key, &payload)
                .await
            {
                error!(
                    outbox_id = event.id,
                    topic = %event.topic,
                    error = %e,
                    "Publish failed; will retry next tick"
                );
                return;
            }

            if let Err(e) = OutboxEvent::mark_published(&self.pool, event.id).await {
                error!(outbox_id = event.id, error = %e, "Failed to stamp outbox row");
                return;
            }
        }
    }
}
