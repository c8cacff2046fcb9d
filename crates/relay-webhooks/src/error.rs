//! Error types for the webhook subsystem.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use relay_core::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Webhook subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Webhook subscription already registered for this URL")]
    DuplicateSubscription,

    #[error("Webhook delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    #[error("Delivery {id} is in terminal status {status} and cannot be retried")]
    DeliveryTerminal { id: Uuid, status: String },

    #[error("Webhook subscription {0} is inactive")]
    SubscriptionInactive(Uuid),

    #[error("Crypto failure: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Event transport error: {0}")]
    Event(#[from] relay_events::EventError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WebhookError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Self::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::SubscriptionNotFound(_) => (StatusCode::NOT_FOUND, "subscription_not_found"),
            Self::DuplicateSubscription => (StatusCode::CONFLICT, "duplicate_subscription"),
            Self::DeliveryNotFound(_) => (StatusCode::NOT_FOUND, "delivery_not_found"),
            Self::DeliveryTerminal { .. } => (StatusCode::CONFLICT, "delivery_terminal"),
            Self::SubscriptionInactive(_) => (StatusCode::CONFLICT, "subscription_inactive"),
            Self::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Event(_) => (StatusCode::INTERNAL_SERVER_ERROR, "event_error"),
            Self::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error"),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let body = ErrorBody::new(status.as_u16(), kind, self.to_string(), "");
        (status, axum::Json(body)).into_response()
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
