//! Transaction database model.
//!
//! The row is the source of truth for a tracked operation; every status
//! change also appends a `transaction_history` entry in the same
//! database transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

use relay_core::TransactionStatus;

/// Database entity for a tracked transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub origin_system: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub error_details: Option<serde_json::Value>,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completion_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub webhook_security_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_reconciled: bool,
    pub notes: Option<String>,
    pub version: i64,
}

/// Input for creating a transaction row.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub id: Uuid,
    pub origin_system: String,
    pub payload: serde_json::Value,
    pub webhook_url: Option<String>,
    pub webhook_security_token: Option<String>,
}

/// Per-status row count.
#[derive(Debug, Clone, FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

impl Transaction {
    /// The parsed status. `None` only if the column was corrupted out of band.
    #[must_use]
    pub fn status_enum(&self) -> Option<TransactionStatus> {
        TransactionStatus::parse(&self.status)
    }

    /// Whether the transaction carries an inline webhook target.
    #[must_use]
    pub fn has_inline_webhook(&self) -> bool {
        self.webhook_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Insert a new row in `PENDING` with attempt count 1.
    pub async fn insert<'e>(
        ex: impl PgExecutor<'e>,
        input: CreateTransaction,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO transactions (
                id, origin_system, status, payload, attempt_count,
                last_attempt_at, webhook_url, webhook_security_token
            )
            VALUES ($1, $2, $3, $4, 1, NOW(), $5, $6)
            RETURNING *
            "#,
        )
        .bind(input.id)
        .bind(&input.origin_system)
        .bind(TransactionStatus::Pending.as_str())
        .bind(&input.payload)
        .bind(&input.webhook_url)
        .bind(&input.webhook_security_token)
        .fetch_one(ex)
        .await
    }

    pub async fn find_by_id<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(ex)
            .await
    }

    pub async fn find_by_id_and_origin<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        origin_system: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM transactions WHERE id = $1 AND origin_system = $2")
            .bind(id)
            .bind(origin_system)
            .fetch_optional(ex)
            .await
    }

    /// Update the status column, bumping `updated_at` and the lock version.
    ///
    /// `completion_at` is written only when provided so non-terminal
    /// transitions leave an earlier completion stamp untouched.
    pub async fn set_status<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        status: TransactionStatus,
        completion_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET status = $2,
                completion_at = COALESCE($3, completion_at),
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completion_at)
        .fetch_optional(ex)
        .await
    }

    /// Record another attempt: bump the counter and stamp `last_attempt_at`.
    pub async fn record_attempt<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET attempt_count = attempt_count + 1,
                last_attempt_at = NOW(),
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(ex)
        .await
    }

    pub async fn set_response<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        response: &serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET response = $2, updated_at = NOW(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(response)
        .fetch_optional(ex)
        .await
    }

    pub async fn set_error_details<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        error_details: &serde_json::Value,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET error_details = $2, updated_at = NOW(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error_details)
        .fetch_optional(ex)
        .await
    }

    pub async fn set_reconciled<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        reconciled: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET is_reconciled = $2, updated_at = NOW(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reconciled)
        .fetch_optional(ex)
        .await
    }

    pub async fn set_notes<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        notes: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE transactions
            SET notes = $2, updated_at = NOW(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(notes)
        .fetch_optional(ex)
        .await
    }

    pub async fn find_by_status<'e>(
        ex: impl PgExecutor<'e>,
        status: TransactionStatus,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Rows stuck in `status` since before `threshold` (by creation time).
    pub async fn find_by_status_created_before<'e>(
        ex: impl PgExecutor<'e>,
        status: TransactionStatus,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(status.as_str())
        .bind(threshold)
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// `PROCESSING` rows idle since before `threshold`, measured from the
    /// last attempt when one exists, otherwise from creation.
    pub async fn find_stalled_processing<'e>(
        ex: impl PgExecutor<'e>,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE status = 'PROCESSING'
              AND GREATEST(COALESCE(last_attempt_at, created_at), created_at) < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Problematic rows the reconciler has not yet visited.
    pub async fn find_unreconciled_problematic<'e>(
        ex: impl PgExecutor<'e>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE status IN ('TIMEOUT', 'INCONSISTENT')
              AND is_reconciled = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    pub async fn find_non_terminal<'e>(
        ex: impl PgExecutor<'e>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE status NOT IN ('COMPLETED', 'FAILED', 'PERMANENTLY_FAILED')
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Non-terminal rows whose attempt count reached `threshold`.
    pub async fn find_excessive_attempts<'e>(
        ex: impl PgExecutor<'e>,
        threshold: i32,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE attempt_count >= $1
              AND status NOT IN ('COMPLETED', 'FAILED', 'PERMANENTLY_FAILED')
            ORDER BY attempt_count DESC
            LIMIT $2
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Terminal rows missing their associated payload: `COMPLETED`
    /// without a response or `FAILED` without error details.
    pub async fn find_terminal_missing_payload<'e>(
        ex: impl PgExecutor<'e>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE (status = 'COMPLETED' AND response IS NULL)
               OR (status = 'FAILED' AND error_details IS NULL)
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(ex)
        .await
    }

    /// Filtered search over origin, status and creation window.
    pub async fn search<'e>(
        ex: impl PgExecutor<'e>,
        origin_system: Option<&str>,
        status: Option<TransactionStatus>,
        created_from: Option<DateTime<Utc>>,
        created_to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM transactions
            WHERE ($1::text IS NULL OR origin_system = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(origin_system)
        .bind(status.map(|s| s.as_str()))
        .bind(created_from)
        .bind(created_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await
    }

    pub async fn count_by_status<'e>(
        ex: impl PgExecutor<'e>,
    ) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as(
            "SELECT status, COUNT(*) AS count FROM transactions GROUP BY status",
        )
        .fetch_all(ex)
        .await
    }

    pub async fn count_all<'e>(ex: impl PgExecutor<'e>) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(ex)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            id: Uuid::nil(),
            origin_system: "billing".into(),
            status: "PENDING".into(),
            payload: serde_json::json!({"amount": 100}),
            response: None,
            error_details: None,
            attempt_count: 1,
            last_attempt_at: None,
            completion_at: None,
            webhook_url: None,
            webhook_security_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_reconciled: false,
            notes: None,
            version: 0,
        }
    }

    #[test]
    fn test_status_enum_parses_column() {
        let tx = sample();
        assert_eq!(tx.status_enum(), Some(TransactionStatus::Pending));
    }

    #[test]
    fn test_status_enum_none_for_corrupt_column() {
        let mut tx = sample();
        tx.status = "pending".into();
        assert_eq!(tx.status_enum(), None);
    }

    #[test]
    fn test_has_inline_webhook() {
        let mut tx = sample();
        assert!(!tx.has_inline_webhook());
        tx.webhook_url = Some(String::new());
        assert!(!tx.has_inline_webhook());
        tx.webhook_url = Some("https://client.example.com/hook".into());
        assert!(tx.has_inline_webhook());
    }
}
