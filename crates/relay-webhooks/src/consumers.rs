//! Event-bus consumers.
//!
//! The transaction-event handler expands each state change into one
//! webhook event per matching subscription, keyed by subscription id.
//! The webhook-event handler materialises the delivery row and runs the
//! first attempt. Delivery event ids are derived deterministically from
//! the source event and the subscription, so redelivered or re-expanded
//! events collapse onto the same row.

use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_db::models::{ProcessedEvent, Transaction};
use relay_events::message::{TransactionEventMessage, WebhookEventMessage};
use relay_events::{EventError, EventProducer, MessageHandler};

use crate::delivery::DeliveryService;
use crate::subscription::SubscriptionService;

/// Consumer group suffix for the expansion worker.
pub const TRANSACTION_WORKER_GROUP: &str = "transaction-worker";

/// Expands transaction events into per-subscription webhook events.
pub struct TransactionEventHandler {
    pool: PgPool,
    subscriptions: SubscriptionService,
    producer: EventProducer,
    topic: String,
}

impl TransactionEventHandler {
    #[must_use]
    pub fn new(
        pool: PgPool,
        subscriptions: SubscriptionService,
        producer: EventProducer,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            subscriptions,
            producer,
            topic: topic.into(),
        }
    }

    async fn expand(&self, event: &TransactionEventMessage) -> Result<(), EventError> {
        let group = format!("relay-{TRANSACTION_WORKER_GROUP}");
        if !ProcessedEvent::try_mark(&self.pool, event.event_id, &group, &self.topic).await? {
            debug!(event_id = %event.event_id, "Event already expanded; skipping");
            return Ok(());
        }

        let mut targets = self
            .subscriptions
            .find_active_for_event(event.event_type.as_str(), &event.origin_system)
            .await
            .map_err(|e| EventError::ConsumeFailed { cause: e.to_string() })?;

        // The transaction's inline webhook URL is an extra target,
        // deduplicated against registered subscriptions by URL.
        if let Some(transaction_id) = event.transaction_id {
            match Transaction::find_by_id(&self.pool, transaction_id).await? {
                Some(txn) if txn.has_inline_webhook() => {
                    let url = txn.webhook_url.clone().unwrap_or_default();
                    if !targets.iter().any(|s| s.callback_url == url) {
                        match self
                            .subscriptions
                            .resolve_inline_target(
                                &txn.origin_system,
                                &url,
                                txn.webhook_security_token.as_deref(),
                            )
                            .await
                        {
                            Ok(inline) => targets.push(inline),
                            Err(e) => {
                                warn!(
                                    transaction_id = %transaction_id,
                                    error = %e,
                                    "Skipping invalid inline webhook target"
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if targets.is_empty() {
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No webhook targets for event"
            );
            return Ok(());
        }

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            targets = targets.len(),
            "Expanding transaction event into webhook deliveries"
        );

        for subscription in targets {
            let delivery_event_id = derive_delivery_id(event.event_id, subscription.id);
            let mut message = WebhookEventMessage::with_id(
                delivery_event_id,
                event.event_type,
                subscription.id,
                event.transaction_id,
                event.origin_system.clone(),
                delivery_payload(event),
            );
            message.current_status = event.current_status;
            message.previous_status = event.previous_status;
            message.high_priority = event.high_priority;

            self.producer.publish_webhook_event(&message).await?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageHandler for TransactionEventHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), EventError> {
        let event = TransactionEventMessage::from_json_bytes(payload)?;
        self.expand(&event).await
    }
}

/// Materialises and executes deliveries for webhook events.
pub struct WebhookEventHandler {
    delivery: DeliveryService,
}

impl WebhookEventHandler {
    #[must_use]
    pub fn new(delivery: DeliveryService) -> Self {
        Self { delivery }
    }
}

#[async_trait::async_trait]
impl MessageHandler for WebhookEventHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), EventError> {
        let message = WebhookEventMessage::from_json_bytes(payload)?;
        self.delivery
            .create_and_execute(&message)
            .await
            .map_err(|e| EventError::ConsumeFailed { cause: e.to_string() })
    }
}

/// Deterministic delivery id: v5 UUID over the source event id and the
/// subscription id.
#[must_use]
pub fn derive_delivery_id(event_id: Uuid, subscription_id: Uuid) -> Uuid {
    Uuid::new_v5(&event_id, subscription_id.as_bytes())
}

/// Payload POSTed to the subscriber: event metadata plus the
/// status-filtered transaction snapshot carried by the source event.
fn delivery_payload(event: &TransactionEventMessage) -> serde_json::Value {
    json!({
        "event_id": event.event_id,
        "event_type": event.event_type,
        "transaction_id": event.transaction_id,
        "origin_system": event.origin_system,
        "status": event.current_status,
        "previous_status": event.previous_status,
        "timestamp": event.timestamp,
        "transaction": event.payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{EventType, TransactionStatus};

    #[test]
    fn test_derived_delivery_id_is_stable() {
        let event = Uuid::new_v4();
        let sub = Uuid::new_v4();
        assert_eq!(derive_delivery_id(event, sub), derive_delivery_id(event, sub));
    }

    #[test]
    fn test_derived_delivery_id_varies_by_subscription() {
        let event = Uuid::new_v4();
        assert_ne!(
            derive_delivery_id(event, Uuid::new_v4()),
            derive_delivery_id(event, Uuid::new_v4())
        );
    }

    #[test]
    fn test_delivery_payload_shape() {
        let txn_id = Uuid::new_v4();
        let event = TransactionEventMessage::new(
            EventType::TransactionCompleted,
            txn_id,
            "billing",
            TransactionStatus::Completed,
            Some(TransactionStatus::Processing),
            json!({"attempt_count": 1, "response": {"status": "success"}}),
        );

        let payload = delivery_payload(&event);
        assert_eq!(payload["event_type"], "TransactionCompleted");
        assert_eq!(payload["status"], "COMPLETED");
        assert_eq!(payload["previous_status"], "PROCESSING");
        assert_eq!(payload["transaction"]["response"]["status"], "success");
    }
}
