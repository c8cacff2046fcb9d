//! Request/response types for the webhook admin surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use relay_core::EventType;
use relay_db::models::{WebhookDelivery, WebhookSubscription};

/// Request body for registering a webhook subscription.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookRequest {
    #[validate(length(min = 1, max = 100, message = "Origin system must be 1-100 characters"))]
    pub origin_system: String,

    #[validate(length(min = 10, max = 2000, message = "URL must be 10-2000 characters"))]
    pub callback_url: String,

    /// Event types this subscription receives; must be non-empty.
    pub events: Vec<String>,

    /// Optional caller-chosen signing token; generated when absent.
    #[validate(length(max = 255, message = "Token cannot exceed 255 characters"))]
    pub security_token: Option<String>,

    pub max_retries: Option<i32>,

    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,

    #[validate(email(message = "Invalid contact email"))]
    pub contact_email: Option<String>,
}

/// Request body for updating a subscription; absent fields keep their
/// stored values.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWebhookRequest {
    #[validate(length(min = 10, max = 2000, message = "URL must be 10-2000 characters"))]
    pub callback_url: Option<String>,

    pub events: Option<Vec<String>>,

    #[validate(length(max = 255, message = "Token cannot exceed 255 characters"))]
    pub security_token: Option<String>,

    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,

    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,

    #[validate(email(message = "Invalid contact email"))]
    pub contact_email: Option<String>,
}

/// Subscription representation without secret material.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscriptionResponse {
    pub id: Uuid,
    pub origin_system: String,
    pub callback_url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub max_retries: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
}

impl From<WebhookSubscription> for WebhookSubscriptionResponse {
    fn from(sub: WebhookSubscription) -> Self {
        let events = sub.event_names();
        Self {
            id: sub.id,
            origin_system: sub.origin_system,
            callback_url: sub.callback_url,
            events,
            is_active: sub.is_active,
            max_retries: sub.max_retries,
            description: sub.description,
            contact_email: sub.contact_email,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
            last_success_at: sub.last_success_at,
            last_failure_at: sub.last_failure_at,
            success_count: sub.success_count,
            failure_count: sub.failure_count,
        }
    }
}

/// Registration response; the only place the plaintext token appears.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookResponse {
    #[serde(flatten)]
    pub subscription: WebhookSubscriptionResponse,
    pub security_token: String,
}

/// One delivery attempt-stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryResponse {
    pub id: Uuid,
    pub webhook_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    pub event_type: String,
    pub delivery_status: String,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgment_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<WebhookDelivery> for WebhookDeliveryResponse {
    fn from(d: WebhookDelivery) -> Self {
        Self {
            id: d.id,
            webhook_id: d.webhook_id,
            transaction_id: d.transaction_id,
            event_type: d.event_type,
            delivery_status: d.delivery_status,
            attempt_count: d.attempt_count,
            last_attempt_at: d.last_attempt_at,
            response_code: d.response_code,
            response_body: d.response_body,
            error_details: d.error_details,
            created_at: d.created_at,
            updated_at: d.updated_at,
            is_acknowledged: d.is_acknowledged,
            acknowledged_at: d.acknowledged_at,
            acknowledgment_status: d.acknowledgment_status,
            next_retry_at: d.next_retry_at,
        }
    }
}

/// Query parameters for the acknowledgement callback.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct AcknowledgeQuery {
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    pub status: String,
}

/// Query parameters for listing subscriptions.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsQuery {
    pub origin_system: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Query parameters for listing deliveries.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Information about a supported event type.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeInfo {
    pub event_type: String,
    pub description: String,
}

/// All supported event types, for discovery.
#[must_use]
pub fn event_type_catalog() -> Vec<EventTypeInfo> {
    EventType::all()
        .into_iter()
        .map(|et| EventTypeInfo {
            event_type: et.as_str().to_string(),
            description: et.description().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_catalog_is_complete() {
        assert_eq!(event_type_catalog().len(), 13);
    }

    #[test]
    fn test_register_request_validation() {
        let request = RegisterWebhookRequest {
            origin_system: "billing".into(),
            callback_url: "https://example.com/hooks".into(),
            events: vec!["TransactionCompleted".into()],
            security_token: None,
            max_retries: None,
            description: None,
            contact_email: Some("ops@example.com".into()),
        };
        assert!(request.validate().is_ok());

        let bad_email = RegisterWebhookRequest {
            contact_email: Some("not-an-email".into()),
            ..request
        };
        assert!(bad_email.validate().is_err());
    }
}
