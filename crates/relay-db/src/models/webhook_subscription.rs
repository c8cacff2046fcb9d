//! Webhook subscription database model.
//!
//! The `security_token` column holds an argon2 hash used only for
//! verification; `secret_encrypted` holds the AES-GCM-encrypted signing
//! secret that the delivery engine decrypts per attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for a registered webhook subscription.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub origin_system: String,
    pub callback_url: String,
    pub events: serde_json::Value,
    pub security_token: String,
    pub secret_encrypted: String,
    pub is_active: bool,
    pub max_retries: i32,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub version: i64,
}

/// Input for registering a subscription.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscription {
    pub origin_system: String,
    pub callback_url: String,
    pub events: Vec<String>,
    pub security_token: String,
    pub secret_encrypted: String,
    pub max_retries: i32,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookSubscription {
    pub callback_url: Option<String>,
    pub events: Option<Vec<String>>,
    pub security_token: Option<String>,
    pub secret_encrypted: Option<String>,
    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}

impl WebhookSubscription {
    /// Subscribed event-type names as strings.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn insert<'e>(
        ex: impl PgExecutor<'e>,
        input: CreateWebhookSubscription,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO webhooks (
                origin_system, callback_url, events, security_token,
                secret_encrypted, max_retries, description, contact_email
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&input.origin_system)
        .bind(&input.callback_url)
        .bind(serde_json::Value::from(input.events.clone()))
        .bind(&input.security_token)
        .bind(&input.secret_encrypted)
        .bind(input.max_retries)
        .bind(&input.description)
        .bind(&input.contact_email)
        .fetch_one(ex)
        .await
    }

    pub async fn find_by_id<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(ex)
            .await
    }

    pub async fn find_by_callback_url<'e>(
        ex: impl PgExecutor<'e>,
        callback_url: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM webhooks WHERE callback_url = $1")
            .bind(callback_url)
            .fetch_optional(ex)
            .await
    }

    pub async fn list_by_origin<'e>(
        ex: impl PgExecutor<'e>,
        origin_system: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM webhooks WHERE origin_system = $1 ORDER BY created_at ASC",
        )
        .bind(origin_system)
        .fetch_all(ex)
        .await
    }

    /// Active subscriptions whose event set contains `event_type` and
    /// whose origin matches the producing transaction's origin.
    pub async fn find_active_for_event<'e>(
        ex: impl PgExecutor<'e>,
        event_type: &str,
        origin_system: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhooks
            WHERE is_active = TRUE
              AND origin_system = $2
              AND events ? $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(event_type)
        .bind(origin_system)
        .fetch_all(ex)
        .await
    }

    pub async fn update<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        changes: UpdateWebhookSubscription,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhooks
            SET callback_url = COALESCE($2, callback_url),
                events = COALESCE($3, events),
                security_token = COALESCE($4, security_token),
                secret_encrypted = COALESCE($5, secret_encrypted),
                is_active = COALESCE($6, is_active),
                max_retries = COALESCE($7, max_retries),
                description = COALESCE($8, description),
                contact_email = COALESCE($9, contact_email),
                updated_at = NOW(),
                version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&changes.callback_url)
        .bind(changes.events.map(serde_json::Value::from))
        .bind(&changes.security_token)
        .bind(&changes.secret_encrypted)
        .bind(changes.is_active)
        .bind(changes.max_retries)
        .bind(&changes.description)
        .bind(&changes.contact_email)
        .fetch_optional(ex)
        .await
    }

    pub async fn delete<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(ex)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_success<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET success_count = success_count + 1,
                last_success_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(ex)
        .await?;
        Ok(())
    }

    pub async fn record_failure<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhooks
            SET failure_count = failure_count + 1,
                last_failure_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(ex)
        .await?;
        Ok(())
    }

    pub async fn set_active<'e>(
        ex: impl PgExecutor<'e>,
        id: Uuid,
        active: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhooks
            SET is_active = $2, updated_at = NOW(), version = version + 1
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_optional(ex)
        .await
    }

    pub async fn list<'e>(
        ex: impl PgExecutor<'e>,
        origin_system: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhooks
            WHERE ($1::text IS NULL OR origin_system = $1)
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(origin_system)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await
    }

    /// Subscriptions whose lifetime failure count reached `min_failures`,
    /// worst first. Feeds the weekly failure report.
    pub async fn find_failing<'e>(
        ex: impl PgExecutor<'e>,
        min_failures: i64,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhooks
            WHERE failure_count >= $1
            ORDER BY failure_count DESC
            LIMIT $2
            "#,
        )
        .bind(min_failures)
        .bind(limit)
        .fetch_all(ex)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_from_json_array() {
        let sub = WebhookSubscription {
            id: Uuid::nil(),
            origin_system: "billing".into(),
            callback_url: "https://example.com/hook".into(),
            events: serde_json::json!(["TransactionCompleted", "TransactionFailed"]),
            security_token: "hash".into(),
            secret_encrypted: "enc".into(),
            is_active: true,
            max_retries: 5,
            description: None,
            contact_email: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_success_at: None,
            last_failure_at: None,
            success_count: 0,
            failure_count: 0,
            version: 0,
        };
        assert_eq!(
            sub.event_names(),
            vec!["TransactionCompleted".to_string(), "TransactionFailed".to_string()]
        );
    }
}
