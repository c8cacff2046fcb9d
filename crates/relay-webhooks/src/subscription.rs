//! Subscription registry service.
//!
//! Registration returns the plaintext security token exactly once; at
//! rest the registry keeps an argon2 hash for verification and an
//! AES-GCM-encrypted copy for the delivery engine's signing context.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use relay_core::ids;
use relay_db::models::{
    CreateWebhookSubscription, UpdateWebhookSubscription, WebhookDelivery, WebhookSubscription,
};

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::{WebhookError, WebhookResult};
use crate::validation::{validate_callback_url, validate_event_types};

/// Input for registering a subscription.
#[derive(Debug, Clone)]
pub struct RegisterSubscription {
    pub origin_system: String,
    pub callback_url: String,
    pub events: Vec<String>,
    /// Caller-chosen token; generated when absent.
    pub security_token: Option<String>,
    pub max_retries: Option<i32>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}

/// Partial update for a subscription.
#[derive(Debug, Clone, Default)]
pub struct UpdateSubscription {
    pub callback_url: Option<String>,
    pub events: Option<Vec<String>>,
    pub security_token: Option<String>,
    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
}

/// Registry operations over the `webhooks` table.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    encryption_key: Vec<u8>,
    default_max_retries: i32,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(pool: PgPool, config: &WebhookConfig) -> Self {
        Self {
            pool,
            encryption_key: config.encryption_key.clone(),
            default_max_retries: config.max_retry_attempts,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register a subscription. Returns the stored row and the
    /// plaintext security token; the token is not retrievable later.
    pub async fn register(
        &self,
        input: RegisterSubscription,
    ) -> WebhookResult<(WebhookSubscription, String)> {
        validate_callback_url(&input.callback_url)?;
        validate_event_types(&input.events)?;

        if WebhookSubscription::find_by_callback_url(&self.pool, &input.callback_url)
            .await?
            .is_some()
        {
            return Err(WebhookError::DuplicateSubscription);
        }

        let token = input
            .security_token
            .unwrap_or_else(ids::generate_signing_token);
        let hashed = crypto::hash_security_token(&token)?;
        let encrypted = crypto::encrypt_secret(&token, &self.encryption_key)?;

        let subscription = WebhookSubscription::insert(
            &self.pool,
            CreateWebhookSubscription {
                origin_system: input.origin_system,
                callback_url: input.callback_url,
                events: input.events,
                security_token: hashed,
                secret_encrypted: encrypted,
                max_retries: input.max_retries.unwrap_or(self.default_max_retries),
                description: input.description,
                contact_email: input.contact_email,
            },
        )
        .await?;

        info!(
            subscription_id = %subscription.id,
            origin_system = %subscription.origin_system,
            "Webhook subscription registered"
        );

        Ok((subscription, token))
    }

    /// Apply a partial update. A new security token is re-hashed and
    /// re-encrypted; deactivation cancels live deliveries.
    pub async fn update(
        &self,
        id: Uuid,
        changes: UpdateSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        // Existence check up front for a clean 404.
        let _ = self.get(id).await?;

        if let Some(url) = &changes.callback_url {
            validate_callback_url(url)?;
        }
        if let Some(events) = &changes.events {
            validate_event_types(events)?;
        }

        let (security_token, secret_encrypted) = match &changes.security_token {
            Some(token) => (
                Some(crypto::hash_security_token(token)?),
                Some(crypto::encrypt_secret(token, &self.encryption_key)?),
            ),
            None => (None, None),
        };

        let deactivating = changes.is_active == Some(false);

        let updated = WebhookSubscription::update(
            &self.pool,
            id,
            UpdateWebhookSubscription {
                callback_url: changes.callback_url,
                events: changes.events,
                security_token,
                secret_encrypted,
                is_active: changes.is_active,
                max_retries: changes.max_retries,
                description: changes.description,
                contact_email: changes.contact_email,
            },
        )
        .await?
        .ok_or(WebhookError::SubscriptionNotFound(id))?;

        if deactivating {
            let canceled = WebhookDelivery::cancel_for_subscription(&self.pool, id).await?;
            if canceled > 0 {
                info!(
                    subscription_id = %id,
                    canceled,
                    "Canceled live deliveries for deactivated subscription"
                );
            }
        }

        Ok(updated)
    }

    /// Delete a subscription and cancel its live deliveries.
    pub async fn delete(&self, id: Uuid) -> WebhookResult<()> {
        let canceled = WebhookDelivery::cancel_for_subscription(&self.pool, id).await?;
        if canceled > 0 {
            info!(subscription_id = %id, canceled, "Canceled live deliveries before delete");
        }

        if !WebhookSubscription::delete(&self.pool, id).await? {
            return Err(WebhookError::SubscriptionNotFound(id));
        }

        info!(subscription_id = %id, "Webhook subscription deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> WebhookResult<WebhookSubscription> {
        WebhookSubscription::find_by_id(&self.pool, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound(id))
    }

    pub async fn list(
        &self,
        origin_system: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        Ok(WebhookSubscription::list(&self.pool, origin_system, limit, offset).await?)
    }

    /// Routing lookup: active subscriptions for an event from an origin.
    pub async fn find_active_for_event(
        &self,
        event_type: &str,
        origin_system: &str,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        Ok(WebhookSubscription::find_active_for_event(&self.pool, event_type, origin_system).await?)
    }

    /// Verify a presented token against the stored hash.
    pub async fn verify_token(&self, id: Uuid, token: &str) -> WebhookResult<bool> {
        let subscription = self.get(id).await?;
        Ok(crypto::verify_security_token(token, &subscription.security_token))
    }

    /// Find or create the internal subscription backing a
    /// transaction-inline webhook URL. Inline targets carry an empty
    /// event set so they never match registry routing; deliveries reach
    /// them only through the transaction that names them.
    pub async fn resolve_inline_target(
        &self,
        origin_system: &str,
        callback_url: &str,
        security_token: Option<&str>,
    ) -> WebhookResult<WebhookSubscription> {
        if let Some(existing) =
            WebhookSubscription::find_by_callback_url(&self.pool, callback_url).await?
        {
            return Ok(existing);
        }

        validate_callback_url(callback_url)?;

        let token = security_token
            .map(str::to_string)
            .unwrap_or_else(ids::generate_signing_token);
        let hashed = crypto::hash_security_token(&token)?;
        let encrypted = crypto::encrypt_secret(&token, &self.encryption_key)?;

        let subscription = WebhookSubscription::insert(
            &self.pool,
            CreateWebhookSubscription {
                origin_system: origin_system.to_string(),
                callback_url: callback_url.to_string(),
                events: Vec::new(),
                security_token: hashed,
                secret_encrypted: encrypted,
                max_retries: self.default_max_retries,
                description: Some("Inline transaction webhook target".to_string()),
                contact_email: None,
            },
        )
        .await?;

        info!(
            subscription_id = %subscription.id,
            "Created inline webhook target"
        );
        Ok(subscription)
    }
}
