//! Webhook delivery database model.
//!
//! The row id equals the event id that produced the delivery, which
//! makes the insert the consumer's idempotence point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use relay_core::DeliveryStatus;

use crate::models::transaction::StatusCount;

/// Database entity for one delivery attempt-stream.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub event_type: String,
    pub delivery_status: String,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub response_code: Option<i16>,
    pub response_body: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledgment_status: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

/// Input for creating a delivery row.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    /// Event id; doubles as the row's primary key.
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl WebhookDelivery {
    #[must_use]
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        DeliveryStatus::parse(&self.delivery_status)
    }

    /// Insert a `PENDING` row, ignoring the insert if the event was
    /// already materialised. Returns `None` on conflict.
    pub async fn insert_if_absent<'e>(
        ex: impl PgExecutor<'e>,
        input: CreateWebhookDelivery,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO webhook_deliveries (
                id, webhook_id, transaction_id, event_type, payload
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(input.id)
        .bind(input.webhook_id)
        .bind(input.transaction_id)
        .bind(&input.event_type)
        .bind(&input.payload)
        .fetch_optional(ex)
        .await
    }

    pub async fn find_by_id<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhook_deliveries WHERE id = $1")
            .bind(id)
            .fetch_optional(ex)
            .await
    }

    pub async fn list_by_webhook<'e>(
        ex: impl PgExecutor<'e>,
        webhook_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(webhook_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await
    }

    pub async fn list_by_transaction<'e>(
        ex: impl PgExecutor<'e>,
        transaction_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE transaction_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(transaction_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await
    }

    /// Deliveries whose scheduled retry time has arrived.
    pub async fn find_due_for_retry<'e>(
        ex: impl PgExecutor<'e>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE delivery_status = 'RETRY_SCHEDULED'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= NOW()
            ORDER BY next_retry_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Deliveries stuck in `PROCESSING` since before `threshold`.
    pub async fn find_hanging<'e>(
        ex: impl PgExecutor<'e>,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE delivery_status = 'PROCESSING'
              AND last_attempt_at IS NOT NULL
              AND last_attempt_at < $1
            ORDER BY last_attempt_at ASC
            LIMIT $2
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Claim a delivery for an attempt: move to `PROCESSING`, bump the
    /// attempt counter and stamp `last_attempt_at`. Only rows waiting in
    /// `PENDING` or `RETRY_SCHEDULED` can be claimed, which makes
    /// concurrent workers race safely.
    pub async fn mark_processing<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'PROCESSING',
                attempt_count = attempt_count + 1,
                last_attempt_at = NOW(),
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND delivery_status IN ('PENDING', 'RETRY_SCHEDULED')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(ex)
        .await
    }

    pub async fn mark_delivered<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        response_code: i16,
        response_body: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'DELIVERED',
                response_code = $2,
                response_body = $3,
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(response_code)
        .bind(response_body)
        .fetch_optional(ex)
        .await
    }

    pub async fn mark_failed<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        error_details: &serde_json::Value,
        response_code: Option<i16>,
        response_body: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'FAILED',
                error_details = $2,
                response_code = $3,
                response_body = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error_details)
        .bind(response_code)
        .bind(response_body)
        .fetch_optional(ex)
        .await
    }

    pub async fn schedule_retry<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'RETRY_SCHEDULED',
                next_retry_at = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .fetch_optional(ex)
        .await
    }

    pub async fn mark_permanently_failed<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'PERMANENTLY_FAILED',
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(ex)
        .await
    }

    /// Cancel every live delivery for a subscription (operator action or
    /// subscription removal).
    pub async fn cancel_for_subscription<'e>(
        ex: impl PgExecutor<'e>,
        webhook_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET delivery_status = 'CANCELED',
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE webhook_id = $1
              AND delivery_status IN ('PENDING', 'PROCESSING', 'FAILED', 'RETRY_SCHEDULED')
            "#,
        )
        .bind(webhook_id)
        .execute(ex)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn acknowledge<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        ack_status: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_deliveries
            SET is_acknowledged = TRUE,
                acknowledged_at = NOW(),
                acknowledgment_status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ack_status)
        .fetch_optional(ex)
        .await
    }

    /// Flag terminal deliveries older than `cutoff` as archived.
    /// Rows are never deleted here.
    pub async fn archive_terminal_older_than<'e>(
        ex: impl PgExecutor<'e>,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET archived = TRUE, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE archived = FALSE
                  AND delivery_status IN ('DELIVERED', 'PERMANENTLY_FAILED', 'CANCELED')
                  AND updated_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(ex)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_status<'e>(
        ex: impl PgExecutor<'e>,
    ) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT delivery_status AS status, COUNT(*) AS count
            FROM webhook_deliveries
            GROUP BY delivery_status
            "#,
        )
        .fetch_all(ex)
        .await
    }

    pub async fn count_all<'e>(ex: impl PgExecutor<'e>) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_deliveries")
            .fetch_one(ex)
            .await?;
        Ok(row.0)
    }
}
