//! In-flight event messages.
//!
//! Neither shape is persisted as an entity; the webhook variant's
//! `event_id` becomes the delivery row's primary key on the consumer
//! side, which is the dedupe point for redelivered messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use relay_core::{EventType, TransactionStatus};

use crate::error::EventError;

/// Transaction lifecycle event, keyed by transaction id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEventMessage {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub transaction_id: Option<Uuid>,
    pub origin_system: String,
    pub current_status: Option<TransactionStatus>,
    pub previous_status: Option<TransactionStatus>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub high_priority: bool,
}

impl TransactionEventMessage {
    /// Build a message for a transaction state change.
    #[must_use]
    pub fn new(
        event_type: EventType,
        transaction_id: Uuid,
        origin_system: impl Into<String>,
        current_status: TransactionStatus,
        previous_status: Option<TransactionStatus>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            transaction_id: Some(transaction_id),
            origin_system: origin_system.into(),
            current_status: Some(current_status),
            previous_status,
            timestamp: Utc::now(),
            payload,
            high_priority: false,
        }
    }

    /// Build a system-level event not tied to a transaction.
    #[must_use]
    pub fn system(
        event_type: EventType,
        origin_system: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            transaction_id: None,
            origin_system: origin_system.into(),
            current_status: None,
            previous_status: None,
            timestamp: Utc::now(),
            payload,
            high_priority: false,
        }
    }

    #[must_use]
    pub fn high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }

    /// Partition key: the transaction id, or the event id for
    /// system-level events not tied to a transaction.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.transaction_id.unwrap_or(self.event_id).to_string()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(EventError::from)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(EventError::from)
    }
}

/// Webhook delivery event, keyed by subscription id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventMessage {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub webhook_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub origin_system: String,
    pub current_status: Option<TransactionStatus>,
    pub previous_status: Option<TransactionStatus>,
    pub attempt_count: i32,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub high_priority: bool,
}

impl WebhookEventMessage {
    /// Build a delivery event with a fresh event id. The id doubles as
    /// the delivery row's primary key on the consumer side.
    #[must_use]
    pub fn new(
        event_type: EventType,
        webhook_id: Uuid,
        transaction_id: Option<Uuid>,
        origin_system: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            webhook_id,
            transaction_id,
            origin_system: origin_system.into(),
            current_status: None,
            previous_status: None,
            attempt_count: 0,
            timestamp: Utc::now(),
            payload,
            high_priority: false,
        }
    }

    /// Build a delivery event with a caller-chosen id, used when the id
    /// must be derived deterministically so re-expansion of the same
    /// source event collapses onto one delivery row.
    #[must_use]
    pub fn with_id(
        event_id: Uuid,
        event_type: EventType,
        webhook_id: Uuid,
        transaction_id: Option<Uuid>,
        origin_system: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id,
            ..Self::new(event_type, webhook_id, transaction_id, origin_system, payload)
        }
    }

    /// Partition key: the subscription id, so one subscriber's
    /// deliveries stay ordered.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.webhook_id.to_string()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(EventError::from)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(EventError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_message_roundtrip() {
        let txn_id = Uuid::new_v4();
        let msg = TransactionEventMessage::new(
            EventType::TransactionCreated,
            txn_id,
            "billing",
            TransactionStatus::Pending,
            None,
            serde_json::json!({"amount": 100}),
        );

        let bytes = msg.to_json_bytes().unwrap();
        let restored = TransactionEventMessage::from_json_bytes(&bytes).unwrap();

        assert_eq!(restored.event_id, msg.event_id);
        assert_eq!(restored.event_type, EventType::TransactionCreated);
        assert_eq!(restored.transaction_id, Some(txn_id));
        assert_eq!(restored.current_status, Some(TransactionStatus::Pending));
        assert_eq!(restored.previous_status, None);
    }

    #[test]
    fn test_transaction_partition_key_is_transaction_id() {
        let txn_id = Uuid::new_v4();
        let msg = TransactionEventMessage::new(
            EventType::TransactionCompleted,
            txn_id,
            "billing",
            TransactionStatus::Completed,
            Some(TransactionStatus::Processing),
            serde_json::json!({}),
        );
        assert_eq!(msg.partition_key(), txn_id.to_string());
    }

    #[test]
    fn test_webhook_partition_key_is_subscription_id() {
        let webhook_id = Uuid::new_v4();
        let msg = WebhookEventMessage::new(
            EventType::TransactionCompleted,
            webhook_id,
            Some(Uuid::new_v4()),
            "billing",
            serde_json::json!({}),
        );
        assert_eq!(msg.partition_key(), webhook_id.to_string());
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let msg = TransactionEventMessage::new(
            EventType::TransactionCreated,
            Uuid::new_v4(),
            "billing",
            TransactionStatus::Pending,
            None,
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("eventId").is_some());
        assert!(json.get("originSystem").is_some());
        assert!(json.get("highPriority").is_some());
    }
}
