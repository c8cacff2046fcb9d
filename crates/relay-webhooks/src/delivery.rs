//! Webhook delivery engine.
//!
//! Executes one attempt per claimed delivery row: sign, POST, record
//! the outcome, then either finish, schedule a jittered retry, or
//! dead-letter once the subscription's attempt ceiling is reached.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use relay_core::{ids, DeliveryStatus, EventType};
use relay_db::models::{CreateWebhookDelivery, WebhookDelivery, WebhookSubscription};
use relay_events::message::WebhookEventMessage;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::{WebhookError, WebhookResult};
use crate::subscription::SubscriptionService;

/// Response body excerpt cap.
const BODY_EXCERPT_CHARS: usize = 4000;

/// Executes webhook deliveries against subscriber endpoints.
#[derive(Clone)]
pub struct DeliveryService {
    pool: PgPool,
    http_client: Client,
    subscriptions: SubscriptionService,
    config: WebhookConfig,
}

impl DeliveryService {
    /// Build the service with a pooled HTTPS client per the configured
    /// connection limits.
    pub fn new(
        pool: PgPool,
        subscriptions: SubscriptionService,
        config: WebhookConfig,
    ) -> WebhookResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.socket_timeout)
            .pool_max_idle_per_host(config.max_connections_per_route)
            .pool_idle_timeout(config.idle_eviction)
            .tcp_keepalive(config.keep_alive)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("relay-webhooks/0.4")
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            pool,
            http_client,
            subscriptions,
            config,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Consumer entry point: materialise the delivery row for an event
    /// message and run the first attempt. The row id equals the event
    /// id, so redelivered messages collapse onto the existing row.
    pub async fn create_and_execute(&self, message: &WebhookEventMessage) -> WebhookResult<()> {
        let subscription = match WebhookSubscription::find_by_id(&self.pool, message.webhook_id)
            .await?
        {
            Some(sub) if sub.is_active => sub,
            Some(_) => {
                warn!(
                    event_id = %message.event_id,
                    webhook_id = %message.webhook_id,
                    "Skipping delivery for inactive subscription"
                );
                return Ok(());
            }
            None => {
                warn!(
                    event_id = %message.event_id,
                    webhook_id = %message.webhook_id,
                    "Skipping delivery for unknown subscription"
                );
                return Ok(());
            }
        };

        let delivery = match WebhookDelivery::insert_if_absent(
            &self.pool,
            CreateWebhookDelivery {
                id: message.event_id,
                webhook_id: message.webhook_id,
                transaction_id: message.transaction_id,
                event_type: message.event_type.as_str().to_string(),
                payload: message.payload.clone(),
            },
        )
        .await?
        {
            Some(created) => created,
            None => {
                // Redelivered message: only continue when the earlier
                // attempt never left the initial status.
                let existing = WebhookDelivery::find_by_id(&self.pool, message.event_id)
                    .await?
                    .ok_or(WebhookError::DeliveryNotFound(message.event_id))?;
                if existing.status_enum() != Some(DeliveryStatus::Pending) {
                    debug!(
                        event_id = %message.event_id,
                        status = %existing.delivery_status,
                        "Delivery already materialised; skipping duplicate event"
                    );
                    return Ok(());
                }
                existing
            }
        };

        self.execute_delivery(&delivery, &subscription).await;
        Ok(())
    }

    /// Run one attempt: claim the row, sign the payload, POST, record.
    pub async fn execute_delivery(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
    ) {
        let claimed = match WebhookDelivery::mark_processing(&self.pool, delivery.id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(
                    delivery_id = %delivery.id,
                    "Delivery not claimable; another worker or a terminal status holds it"
                );
                return;
            }
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Failed to claim delivery");
                return;
            }
        };

        let payload_bytes = match serde_json::to_vec(&claimed.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.handle_failure(
                    &claimed,
                    subscription,
                    json!({"message": format!("Failed to serialize payload: {e}"), "type": "serialization"}),
                    None,
                    None,
                )
                .await;
                return;
            }
        };

        let secret = match crypto::decrypt_secret(
            &subscription.secret_encrypted,
            &self.config.encryption_key,
        ) {
            Ok(secret) => secret,
            Err(e) => {
                error!(
                    delivery_id = %claimed.id,
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to decrypt signing secret"
                );
                self.handle_failure(
                    &claimed,
                    subscription,
                    json!({"message": "Signing secret unavailable", "type": "crypto"}),
                    None,
                    None,
                )
                .await;
                return;
            }
        };

        let signature =
            crypto::compute_signature(self.config.signature_algorithm, &secret, &payload_bytes);
        let timestamp_header =
            crypto::replay_protection_header(Utc::now().timestamp_millis(), &ids::generate_nonce());

        info!(
            delivery_id = %claimed.id,
            subscription_id = %subscription.id,
            event_type = %claimed.event_type,
            attempt = claimed.attempt_count,
            "Dispatching webhook"
        );

        let result = self
            .http_client
            .post(&subscription.callback_url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature.as_str())
            .header("X-Webhook-ID", subscription.id.to_string())
            .header("X-Delivery-ID", claimed.id.to_string())
            .header("X-Event-Type", claimed.event_type.as_str())
            .header("X-Webhook-Timestamp", timestamp_header.as_str())
            .body(payload_bytes)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16() as i16;
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(BODY_EXCERPT_CHARS)
                    .collect();

                if (200..300).contains(&(status_code as u16)) {
                    self.handle_success(&claimed, subscription, status_code, &body).await;
                } else {
                    self.handle_failure(
                        &claimed,
                        subscription,
                        json!({"message": format!("HTTP {status_code}"), "type": "http_status"}),
                        Some(status_code),
                        Some(&body),
                    )
                    .await;
                }
            }
            Err(e) => {
                let kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "transport"
                };
                self.handle_failure(
                    &claimed,
                    subscription,
                    json!({"message": e.to_string(), "type": kind}),
                    None,
                    None,
                )
                .await;
            }
        }
    }

    async fn handle_success(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        status_code: i16,
        body: &str,
    ) {
        info!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            status_code,
            attempt = delivery.attempt_count,
            "Webhook delivered"
        );

        if let Err(e) =
            WebhookDelivery::mark_delivered(&self.pool, delivery.id, status_code, Some(body)).await
        {
            error!(delivery_id = %delivery.id, error = %e, "Failed to record delivered status");
        }

        if let Err(e) = WebhookSubscription::record_success(&self.pool, subscription.id).await {
            error!(subscription_id = %subscription.id, error = %e, "Failed to bump success counters");
        }
    }

    /// Failure policy: record the failed attempt, then dead-letter or
    /// schedule the next attempt with jittered exponential backoff.
    pub async fn handle_failure(
        &self,
        delivery: &WebhookDelivery,
        subscription: &WebhookSubscription,
        error_details: serde_json::Value,
        status_code: Option<i16>,
        body: Option<&str>,
    ) {
        warn!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            attempt = delivery.attempt_count,
            error = %error_details,
            "Webhook delivery attempt failed"
        );

        if let Err(e) =
            WebhookDelivery::mark_failed(&self.pool, delivery.id, &error_details, status_code, body)
                .await
        {
            error!(delivery_id = %delivery.id, error = %e, "Failed to record failed status");
            return;
        }

        if delivery.attempt_count >= subscription.max_retries {
            info!(
                delivery_id = %delivery.id,
                attempts = delivery.attempt_count,
                max_retries = subscription.max_retries,
                "Retries exhausted; delivery permanently failed"
            );
            if let Err(e) = WebhookDelivery::mark_permanently_failed(&self.pool, delivery.id).await
            {
                error!(delivery_id = %delivery.id, error = %e, "Failed to dead-letter delivery");
            }
        } else {
            let delay_secs =
                compute_retry_delay(delivery.attempt_count, self.config.base_delay_seconds);
            let next_retry_at = Utc::now() + Duration::seconds(delay_secs as i64);
            info!(
                delivery_id = %delivery.id,
                delay_secs,
                "Scheduling delivery retry"
            );
            if let Err(e) =
                WebhookDelivery::schedule_retry(&self.pool, delivery.id, next_retry_at).await
            {
                error!(delivery_id = %delivery.id, error = %e, "Failed to schedule retry");
            }
        }

        if let Err(e) = WebhookSubscription::record_failure(&self.pool, subscription.id).await {
            error!(subscription_id = %subscription.id, error = %e, "Failed to bump failure counters");
        }
    }

    /// One retry-pump pass with bounded concurrency.
    pub async fn process_due_retries(&self) -> WebhookResult<usize> {
        let due =
            WebhookDelivery::find_due_for_retry(&self.pool, self.config.retry_batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }

        info!(count = due.len(), "Processing due webhook retries");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_concurrent_retries));
        let mut handles = Vec::with_capacity(due.len());

        for delivery in due {
            let service = self.clone();
            let sem = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                service.process_retry(&delivery).await;
            }));
        }

        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Retry task panicked");
            }
        }
        Ok(count)
    }

    /// Run one scheduled retry, cancelling the stream when its
    /// subscription is gone or inactive.
    pub async fn process_retry(&self, delivery: &WebhookDelivery) {
        match WebhookSubscription::find_by_id(&self.pool, delivery.webhook_id).await {
            Ok(Some(sub)) if sub.is_active => {
                self.execute_delivery(delivery, &sub).await;
            }
            Ok(_) => {
                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.webhook_id,
                    "Cancelling retry; subscription missing or inactive"
                );
                if let Err(e) =
                    WebhookDelivery::cancel_for_subscription(&self.pool, delivery.webhook_id).await
                {
                    error!(delivery_id = %delivery.id, error = %e, "Failed to cancel deliveries");
                }
            }
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Failed to load subscription for retry");
            }
        }
    }

    /// Operator-triggered retry of a non-terminal delivery.
    pub async fn retry_now(&self, delivery_id: Uuid) -> WebhookResult<WebhookDelivery> {
        let delivery = WebhookDelivery::find_by_id(&self.pool, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;

        if delivery.status_enum().is_some_and(|s| s.is_terminal()) {
            return Err(WebhookError::DeliveryTerminal {
                id: delivery_id,
                status: delivery.delivery_status.clone(),
            });
        }

        let scheduled = WebhookDelivery::schedule_retry(&self.pool, delivery_id, Utc::now())
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;

        self.process_retry(&scheduled).await;

        WebhookDelivery::find_by_id(&self.pool, delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))
    }

    /// Subscriber acknowledgement by event id.
    pub async fn acknowledge(
        &self,
        event_id: Uuid,
        ack_status: &str,
    ) -> WebhookResult<WebhookDelivery> {
        WebhookDelivery::acknowledge(&self.pool, event_id, ack_status)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(event_id))
    }

    /// Send a test event to a subscription synchronously and return the
    /// delivery outcome.
    pub async fn send_test_event(&self, webhook_id: Uuid) -> WebhookResult<WebhookDelivery> {
        let subscription = self.subscriptions.get(webhook_id).await?;

        let event_id = ids::new_event_id();
        let payload = json!({
            "event": EventType::Test.as_str(),
            "timestamp": Utc::now(),
            "webhookId": webhook_id,
        });

        let delivery = WebhookDelivery::insert_if_absent(
            &self.pool,
            CreateWebhookDelivery {
                id: event_id,
                webhook_id,
                transaction_id: None,
                event_type: EventType::Test.as_str().to_string(),
                payload,
            },
        )
        .await?
        .ok_or(WebhookError::DeliveryNotFound(event_id))?;

        self.execute_delivery(&delivery, &subscription).await;

        WebhookDelivery::find_by_id(&self.pool, event_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(event_id))
    }

    /// Force hung `PROCESSING` deliveries through the failure policy.
    pub async fn sweep_hanging(&self) -> WebhookResult<usize> {
        let threshold = Utc::now() - self.config.hang_timeout;
        let hanging = WebhookDelivery::find_hanging(&self.pool, threshold, self.config.retry_batch_size)
            .await?;

        if hanging.is_empty() {
            return Ok(0);
        }

        info!(count = hanging.len(), "Found hanging webhook deliveries");

        let mut rescheduled = 0;
        for delivery in hanging {
            let subscription =
                match WebhookSubscription::find_by_id(&self.pool, delivery.webhook_id).await {
                    Ok(Some(sub)) => sub,
                    Ok(None) => {
                        let _ = WebhookDelivery::cancel_for_subscription(
                            &self.pool,
                            delivery.webhook_id,
                        )
                        .await;
                        continue;
                    }
                    Err(e) => {
                        error!(delivery_id = %delivery.id, error = %e, "Failed to load subscription");
                        continue;
                    }
                };

            self.handle_failure(
                &delivery,
                &subscription,
                json!({"message": "processing timeout", "type": "hang"}),
                None,
                None,
            )
            .await;
            rescheduled += 1;
        }
        Ok(rescheduled)
    }

    /// Archive terminal deliveries older than the configured age.
    pub async fn archive_old_deliveries(&self) -> WebhookResult<u64> {
        let cutoff = Utc::now() - self.config.max_age;
        let archived =
            WebhookDelivery::archive_terminal_older_than(&self.pool, cutoff, 1000).await?;
        if archived > 0 {
            info!(archived, "Archived old webhook deliveries");
        }
        Ok(archived)
    }

    /// Counts by status plus the overall success rate.
    pub async fn statistics(&self) -> WebhookResult<serde_json::Value> {
        let counts = WebhookDelivery::count_by_status(&self.pool).await?;
        let total = WebhookDelivery::count_all(&self.pool).await?;

        let mut by_status = serde_json::Map::new();
        let mut delivered = 0i64;
        for c in counts {
            if c.status == DeliveryStatus::Delivered.as_str() {
                delivered = c.count;
            }
            by_status.insert(c.status, json!(c.count));
        }

        let success_rate = if total > 0 {
            ((delivered as f64 / total as f64) * 10000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(json!({
            "countsByStatus": by_status,
            "totalDeliveries": total,
            "successRate": success_rate,
        }))
    }
}

/// Jittered exponential backoff in whole seconds:
/// `min(3600, 2^(attempt-1) * base * (1 + U[0, 0.25]))`.
#[must_use]
pub fn compute_retry_delay(attempt_count: i32, base_delay_seconds: u32) -> u64 {
    let exponent = attempt_count.max(1) - 1;
    let exponential = 2f64.powi(exponent) * f64::from(base_delay_seconds);
    let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
    (exponential * jitter).round().min(3600.0) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_retry_delay_within_jitter_band() {
        for _ in 0..50 {
            let delay = compute_retry_delay(1, 60);
            assert!((60..=75).contains(&delay), "delay {delay} outside 60..=75");
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        for _ in 0..50 {
            let delay = compute_retry_delay(3, 60);
            // 2^2 * 60 = 240, plus up to 25% jitter.
            assert!((240..=300).contains(&delay), "delay {delay} outside 240..=300");
        }
    }

    #[test]
    fn test_delay_capped_at_one_hour() {
        for attempt in 7..12 {
            assert!(compute_retry_delay(attempt, 60) <= 3600);
        }
    }

    #[test]
    fn test_zero_attempt_treated_as_first() {
        let delay = compute_retry_delay(0, 60);
        assert!((60..=75).contains(&delay));
    }
}
