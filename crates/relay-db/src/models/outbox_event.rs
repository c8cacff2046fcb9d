//! Event outbox.
//!
//! Services insert outbox rows inside the same database transaction as
//! the entity update; the relay task drains unpublished rows onto the
//! bus and stamps them afterwards. Consumers must tolerate redelivery.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;

/// One event awaiting (or past) publication.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub async fn insert<'e>(
        ex: impl PgExecutor<'e>,
        topic: &str,
        partition_key: &str,
        payload: &serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO outbox_events (topic, partition_key, payload)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(topic)
        .bind(partition_key)
        .bind(payload)
        .fetch_one(ex)
        .await
    }

    /// Oldest unpublished rows, in insertion order.
    pub async fn fetch_unpublished<'e>(
        ex: impl PgExecutor<'e>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM outbox_events
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    pub async fn mark_published<'e>(ex: impl PgExecutor<'e>, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE outbox_events SET published_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(ex)
            .await?;
        Ok(())
    }
}
