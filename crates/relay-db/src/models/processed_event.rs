//! Consumer-side idempotence guard.
//!
//! Relies on the `(event_id, consumer_group)` primary key: whoever wins
//! the insert processes the event, everyone else skips.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub consumer_group: String,
    pub topic: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Try to claim an event for a consumer group.
    ///
    /// Returns true if this call won the claim, false if the event was
    /// already processed by the group.
    pub async fn try_mark<'e>(
        ex: impl PgExecutor<'e>,
        event_id: Uuid,
        consumer_group: &str,
        topic: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, consumer_group, topic)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, consumer_group) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(consumer_group)
        .bind(topic)
        .execute(ex)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_processed<'e>(
        ex: impl PgExecutor<'e>,
        event_id: Uuid,
        consumer_group: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE event_id = $1 AND consumer_group = $2
            )
            "#,
        )
        .bind(event_id)
        .bind(consumer_group)
        .fetch_one(ex)
        .await?;
        Ok(row.0)
    }
}
