//! Append-only transaction state-transition log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use relay_core::TransactionStatus;

/// One observed state transition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub id: i64,
    pub transaction_id: Uuid,
    pub previous_status: Option<String>,
    pub new_status: String,
    pub changed_at: DateTime<Utc>,
    pub reason: String,
    pub changed_by: String,
    pub context: Option<String>,
    pub attempt_number: i32,
    pub is_automatic: bool,
}

/// Input for appending a history entry.
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub transaction_id: Uuid,
    pub previous_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    pub reason: String,
    pub changed_by: String,
    pub context: Option<String>,
    pub attempt_number: i32,
    pub is_automatic: bool,
}

/// Count of transitions into a status.
#[derive(Debug, Clone, FromRow)]
pub struct TransitionCount {
    pub new_status: String,
    pub count: i64,
}

impl TransactionHistory {
    #[must_use]
    pub fn new_status_enum(&self) -> Option<TransactionStatus> {
        TransactionStatus::parse(&self.new_status)
    }

    pub async fn insert<'e>(
        ex: impl PgExecutor<'e>,
        entry: NewHistoryEntry,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO transaction_history (
                transaction_id, previous_status, new_status,
                reason, changed_by, context, attempt_number, is_automatic
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(entry.transaction_id)
        .bind(entry.previous_status.map(|s| s.as_str()))
        .bind(entry.new_status.as_str())
        .bind(&entry.reason)
        .bind(&entry.changed_by)
        .bind(&entry.context)
        .bind(entry.attempt_number)
        .bind(entry.is_automatic)
        .fetch_one(ex)
        .await
    }

    /// Full history for one transaction, oldest first.
    pub async fn list_for_transaction<'e>(
        ex: impl PgExecutor<'e>,
        transaction_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transaction_history
            WHERE transaction_id = $1
            ORDER BY changed_at ASC, id ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(ex)
        .await
    }

    pub async fn count_for_transaction<'e>(
        ex: impl PgExecutor<'e>,
        transaction_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transaction_history WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_one(ex)
                .await?;
        Ok(row.0)
    }

    /// Transactions whose history reached `threshold` entries.
    pub async fn transactions_with_entries_at_least<'e>(
        ex: impl PgExecutor<'e>,
        threshold: i64,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT transaction_id FROM transaction_history
            GROUP BY transaction_id
            HAVING COUNT(*) >= $1
            LIMIT $2
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(ex)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Transition counts within a time window, grouped by target status.
    pub async fn transition_counts_between<'e>(
        ex: impl PgExecutor<'e>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransitionCount>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT new_status, COUNT(*) AS count
            FROM transaction_history
            WHERE changed_at >= $1 AND changed_at <= $2
            GROUP BY new_status
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(ex)
        .await
    }
}
