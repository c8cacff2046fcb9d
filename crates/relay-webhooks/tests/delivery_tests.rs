//! Delivery engine integration tests.
//!
//! Requires a scratch Postgres reachable through `DATABASE_URL`; the
//! subscriber endpoint is a wiremock server.

#![cfg(feature = "integration")]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::ids;
use relay_db::models::{
    CreateWebhookDelivery, CreateWebhookSubscription, WebhookDelivery, WebhookSubscription,
};
use relay_webhooks::crypto::{self, SignatureAlgorithm};
use relay_webhooks::{DeliveryService, SubscriptionService, WebhookConfig};

const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];
const SIGNING_SECRET: &str = "test-signing-secret";

async fn setup() -> (PgPool, DeliveryService) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = relay_db::connect_pool(&database_url, 5).await.expect("pool");
    relay_db::migrations::run(&pool).await.expect("migrations");

    let config = WebhookConfig::new(ENCRYPTION_KEY.to_vec());
    let subscriptions = SubscriptionService::new(pool.clone(), &config);
    let delivery = DeliveryService::new(pool.clone(), subscriptions, config).expect("service");
    (pool, delivery)
}

/// Insert a subscription row directly; registration validation would
/// reject the mock server's plain-HTTP loopback URL.
async fn insert_subscription(
    pool: &PgPool,
    callback_url: &str,
    max_retries: i32,
) -> WebhookSubscription {
    WebhookSubscription::insert(
        pool,
        CreateWebhookSubscription {
            origin_system: "billing".to_string(),
            callback_url: callback_url.to_string(),
            events: vec!["TransactionCompleted".to_string()],
            security_token: crypto::hash_security_token(SIGNING_SECRET).unwrap(),
            secret_encrypted: crypto::encrypt_secret(SIGNING_SECRET, &ENCRYPTION_KEY).unwrap(),
            max_retries,
            description: None,
            contact_email: None,
        },
    )
    .await
    .expect("insert subscription")
}

async fn insert_delivery(pool: &PgPool, webhook_id: Uuid) -> WebhookDelivery {
    WebhookDelivery::insert_if_absent(
        pool,
        CreateWebhookDelivery {
            id: ids::new_event_id(),
            webhook_id,
            transaction_id: Some(Uuid::new_v4()),
            event_type: "TransactionCompleted".to_string(),
            payload: json!({"event_type": "TransactionCompleted", "amount": 100}),
        },
    )
    .await
    .expect("insert delivery")
    .expect("fresh delivery")
}

#[tokio::test]
async fn test_delivery_succeeds_on_2xx() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let subscription =
        insert_subscription(&pool, &format!("{}/hook", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    service.execute_delivery(&delivery, &subscription).await;

    let row = WebhookDelivery::find_by_id(&pool, delivery.id).await.unwrap().unwrap();
    assert_eq!(row.delivery_status, "DELIVERED");
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.response_code, Some(200));
    assert_eq!(row.response_body.as_deref(), Some("ok"));
    assert!(row.next_retry_at.is_none());

    let sub = WebhookSubscription::find_by_id(&pool, subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.success_count, 1);
    assert!(sub.last_success_at.is_some());
}

#[tokio::test]
async fn test_signature_and_headers_verify() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/sig", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    service.execute_delivery(&delivery, &subscription).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let signature = request
        .headers
        .get("x-webhook-signature")
        .expect("signature header")
        .to_str()
        .unwrap()
        .to_string();

    // Base64, and it verifies over the exact bytes we received.
    assert!(BASE64.decode(&signature).is_ok());
    assert!(crypto::verify_signature(
        SignatureAlgorithm::HmacSha256,
        SIGNING_SECRET,
        &request.body,
        &signature,
    ));

    assert_eq!(
        request.headers.get("x-webhook-id").unwrap().to_str().unwrap(),
        subscription.id.to_string()
    );
    assert_eq!(
        request.headers.get("x-delivery-id").unwrap().to_str().unwrap(),
        delivery.id.to_string()
    );
    assert_eq!(
        request.headers.get("x-event-type").unwrap().to_str().unwrap(),
        "TransactionCompleted"
    );
    let timestamp = request
        .headers
        .get("x-webhook-timestamp")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(timestamp.starts_with("t="));
    assert!(timestamp.contains(",n="));
}

#[tokio::test]
async fn test_failed_delivery_schedules_jittered_retry() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/r", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    let before = Utc::now();
    service.execute_delivery(&delivery, &subscription).await;

    let row = WebhookDelivery::find_by_id(&pool, delivery.id).await.unwrap().unwrap();
    assert_eq!(row.delivery_status, "RETRY_SCHEDULED");
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.response_code, Some(503));

    // First retry lands at base delay (60 s) plus up to 25% jitter.
    let next = row.next_retry_at.expect("next_retry_at");
    let delay = (next - before).num_seconds();
    assert!((58..=80).contains(&delay), "delay {delay}s outside jitter band");

    let sub = WebhookSubscription::find_by_id(&pool, subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.failure_count, 1);
}

#[tokio::test]
async fn test_retry_then_success() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/rs", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    service.execute_delivery(&delivery, &subscription).await;

    // Pull the scheduled retry forward and pump.
    sqlx::query("UPDATE webhook_deliveries SET next_retry_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(delivery.id)
        .execute(&pool)
        .await
        .unwrap();
    service.process_due_retries().await.unwrap();

    let row = WebhookDelivery::find_by_id(&pool, delivery.id).await.unwrap().unwrap();
    assert_eq!(row.delivery_status, "DELIVERED");
    assert_eq!(row.attempt_count, 2);
}

#[tokio::test]
async fn test_permanent_failure_after_exhausted_retries() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/pf", server.uri()), 2).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    service.execute_delivery(&delivery, &subscription).await;

    sqlx::query("UPDATE webhook_deliveries SET next_retry_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(delivery.id)
        .execute(&pool)
        .await
        .unwrap();
    service.process_due_retries().await.unwrap();

    let row = WebhookDelivery::find_by_id(&pool, delivery.id).await.unwrap().unwrap();
    assert_eq!(row.delivery_status, "PERMANENTLY_FAILED");
    assert_eq!(row.attempt_count, 2);
    assert!(row.next_retry_at.is_none());

    // Every failed attempt bumped the failure counter.
    let sub = WebhookSubscription::find_by_id(&pool, subscription.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.failure_count, 2);
}

#[tokio::test]
async fn test_hang_sweep_reschedules_stuck_delivery() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/h", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;

    // Simulate a worker that died mid-attempt 40 minutes ago.
    sqlx::query(
        "UPDATE webhook_deliveries
         SET delivery_status = 'PROCESSING', attempt_count = 1, last_attempt_at = $2
         WHERE id = $1",
    )
    .bind(delivery.id)
    .bind(Utc::now() - Duration::minutes(40))
    .execute(&pool)
    .await
    .unwrap();

    let swept = service.sweep_hanging().await.unwrap();
    assert!(swept >= 1);

    let row = WebhookDelivery::find_by_id(&pool, delivery.id).await.unwrap().unwrap();
    assert_eq!(row.delivery_status, "RETRY_SCHEDULED");
    assert_eq!(row.error_details.as_ref().unwrap()["message"], "processing timeout");
    assert!(row.next_retry_at.is_some());
}

#[tokio::test]
async fn test_acknowledgement_marks_delivery() {
    let (pool, service) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let subscription = insert_subscription(&pool, &format!("{}/a", server.uri()), 5).await;
    let delivery = insert_delivery(&pool, subscription.id).await;
    service.execute_delivery(&delivery, &subscription).await;

    let acked = service.acknowledge(delivery.id, "processed").await.unwrap();
    assert!(acked.is_acknowledged);
    assert_eq!(acked.acknowledgment_status.as_deref(), Some("processed"));
    assert!(acked.acknowledged_at.is_some());
}
