//! Transaction lifecycle integration tests.
//!
//! Requires a scratch Postgres reachable through `DATABASE_URL`.

#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use relay_core::{actors, TransactionStatus};
use relay_db::models::{OutboxEvent, Transaction, TransactionHistory};
use relay_transactions::{
    IdempotencyResolver, StateManager, TransactionConfig, TransactionError, TransactionRequest,
    TransactionService,
};

async fn setup() -> (PgPool, TransactionService) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = relay_db::connect_pool(&database_url, 5).await.expect("pool");
    relay_db::migrations::run(&pool).await.expect("migrations");

    let config = TransactionConfig::default();
    let service = TransactionService::new(
        pool.clone(),
        IdempotencyResolver::default(),
        StateManager::new(config.clone()),
        config,
        "transaction-events",
    );
    (pool, service)
}

fn request(id: Uuid, amount: i64) -> TransactionRequest {
    TransactionRequest {
        transaction_id: id,
        origin_system: "billing".to_string(),
        payload: json!({"amount": amount, "reference": "r1"}),
        webhook_url: None,
        webhook_security_token: None,
        retry: false,
    }
}

#[tokio::test]
async fn test_create_then_complete_happy_path() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    let created = service.process(request(id, 100)).await.expect("create");
    assert_eq!(created.status, "PENDING");
    assert_eq!(created.attempt_count, 1);

    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].new_status, "PENDING");
    assert!(history[0].previous_status.is_none());

    let completed = service
        .complete(id, json!({"status": "success"}), actors::SYSTEM)
        .await
        .expect("complete");
    assert_eq!(completed.status, "COMPLETED");
    assert_eq!(completed.attempt_count, 1);
    assert!(completed.response.is_some());
    assert!(completed.completion_at.is_some());

    // History replay determines current status.
    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    assert_eq!(history.last().unwrap().new_status, completed.status);

    // Create + complete each enqueued an event.
    let outbox = OutboxEvent::fetch_unpublished(&pool, 1000).await.unwrap();
    let ours: Vec<_> = outbox
        .iter()
        .filter(|e| e.partition_key == id.to_string())
        .collect();
    assert_eq!(ours.len(), 2);
    assert_eq!(ours[1].payload["eventType"], "TransactionCompleted");
}

#[tokio::test]
async fn test_idempotent_resubmission_returns_existing() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    let first = service.process(request(id, 100)).await.expect("create");
    let second = service.process(request(id, 100)).await.expect("resubmit");

    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt_count, 1);
    assert_eq!(second.status, "PENDING");

    // No extra history row for the idempotent repeat.
    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_conflicting_resubmission_rejected() {
    let (_pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");
    let err = service.process(request(id, 200)).await.unwrap_err();

    match err {
        TransactionError::Duplicate { id: existing, status } => {
            assert_eq!(existing, id);
            assert_eq!(status, TransactionStatus::Pending);
        }
        other => panic!("expected Duplicate, got {other}"),
    }
}

#[tokio::test]
async fn test_explicit_retry_increments_attempts() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");

    let mut retry = request(id, 100);
    retry.retry = true;
    let updated = service.process(retry).await.expect("retry");

    assert_eq!(updated.attempt_count, 2);
    assert!(updated.last_attempt_at.is_some());

    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].reason, "Retry attempt");
    assert_eq!(history[1].changed_by, "SYSTEM_RETRY");
}

#[tokio::test]
async fn test_retry_past_ceiling_fails_transaction() {
    let (_pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");

    let mut retry = request(id, 100);
    retry.retry = true;
    service.process(retry.clone()).await.expect("retry 2");
    service.process(retry.clone()).await.expect("retry 3");
    let failed = service.process(retry).await.expect("retry past ceiling");

    assert_eq!(failed.status, "FAILED");
    assert!(failed.error_details.is_some());
    assert!(failed.completion_at.is_some());
}

#[tokio::test]
async fn test_reconcile_backdated_pending_times_out() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");

    // Backdate creation so the pending timeout (5 min) has elapsed.
    sqlx::query("UPDATE transactions SET created_at = $2 WHERE id = $1")
        .bind(id)
        .bind(Utc::now() - Duration::minutes(10))
        .execute(&pool)
        .await
        .unwrap();

    let reconciled = service.reconcile(id).await.expect("reconcile");
    assert_eq!(reconciled.status, "TIMEOUT");
    assert!(reconciled.is_reconciled);

    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.new_status, "TIMEOUT");
    assert_eq!(last.changed_by, "SYSTEM_RECONCILIATION");
    assert_eq!(last.reason, "Automatic reconciliation");
}

#[tokio::test]
async fn test_manual_resolution_bypasses_transition_check() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");
    service
        .complete(id, json!({"status": "success"}), actors::SYSTEM)
        .await
        .expect("complete");

    // COMPLETED is terminal for automatic transitions; operators may
    // still override it.
    let overridden = service
        .manually_handle(id, TransactionStatus::Failed, "charge reversed", "ops.alice")
        .await
        .expect("manual override");

    assert_eq!(overridden.status, "FAILED");
    assert_eq!(overridden.notes.as_deref(), Some("charge reversed"));

    let history = TransactionHistory::list_for_transaction(&pool, id).await.unwrap();
    let manual = history.iter().find(|h| !h.is_automatic).expect("manual entry");
    assert_eq!(manual.changed_by, "ops.alice");
    assert_eq!(manual.new_status, "FAILED");
}

#[tokio::test]
async fn test_update_status_rejects_illegal_transition() {
    let (_pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");
    service
        .complete(id, json!({"status": "success"}), actors::SYSTEM)
        .await
        .expect("complete");

    let err = service
        .update_status(id, TransactionStatus::Processing, "no", actors::SYSTEM)
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_attempt_count_is_monotone() {
    let (pool, service) = setup().await;
    let id = Uuid::new_v4();

    service.process(request(id, 100)).await.expect("create");
    let mut last_seen = 0;
    for _ in 0..3 {
        let mut retry = request(id, 100);
        retry.retry = true;
        let _ = service.process(retry).await;
        let row = Transaction::find_by_id(&pool, id).await.unwrap().unwrap();
        assert!(row.attempt_count >= last_seen);
        last_seen = row.attempt_count;
    }
}
