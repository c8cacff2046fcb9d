//! Transaction lifecycle service.
//!
//! Every mutating operation runs a single database transaction covering
//! the row update, the history append, and the outbox insert, so the
//! audit trail always replays to the row's current status and events
//! are published iff the change committed.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relay_core::{actors, EventType, TransactionStatus};
use relay_db::models::{
    CreateTransaction, NewHistoryEntry, OutboxEvent, StatusCount, Transaction, TransactionHistory,
};
use relay_events::message::TransactionEventMessage;

use crate::config::TransactionConfig;
use crate::error::TransactionError;
use crate::idempotency::{IdempotencyOutcome, IdempotencyResolver};
use crate::state_manager::StateManager;

/// Incoming submission for a tracked operation.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Caller-chosen identifier; the idempotency key.
    pub transaction_id: Uuid,
    pub origin_system: String,
    pub payload: serde_json::Value,
    pub webhook_url: Option<String>,
    pub webhook_security_token: Option<String>,
    /// Caller explicitly marks the submission as a retry.
    pub retry: bool,
}

/// Service coordinating transaction lifecycle operations.
pub struct TransactionService {
    pool: PgPool,
    resolver: IdempotencyResolver,
    state_manager: StateManager,
    config: TransactionConfig,
    event_topic: String,
}

impl TransactionService {
    #[must_use]
    pub fn new(
        pool: PgPool,
        resolver: IdempotencyResolver,
        state_manager: StateManager,
        config: TransactionConfig,
        event_topic: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            resolver,
            state_manager,
            config,
            event_topic: event_topic.into(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn state_manager(&self) -> &StateManager {
        &self.state_manager
    }

    /// Process a submission: create the transaction, or resolve the
    /// request against the existing row with the same id.
    pub async fn process(
        &self,
        request: TransactionRequest,
    ) -> Result<Transaction, TransactionError> {
        info!(
            transaction_id = %request.transaction_id,
            origin_system = %request.origin_system,
            retry = request.retry,
            "Processing transaction submission"
        );

        match Transaction::find_by_id(&self.pool, request.transaction_id).await? {
            Some(existing) => self.handle_existing(existing, request).await,
            None => self.create(request).await,
        }
    }

    async fn handle_existing(
        &self,
        existing: Transaction,
        request: TransactionRequest,
    ) -> Result<Transaction, TransactionError> {
        let status = status_of(&existing)?;

        if !request.retry {
            let outcome = self.resolver.classify(
                existing.id,
                &existing.origin_system,
                &existing.payload,
                &request.origin_system,
                &request.payload,
            );
            if outcome == IdempotencyOutcome::Conflict {
                warn!(transaction_id = %existing.id, "Duplicate transaction detected");
                return Err(TransactionError::Duplicate {
                    id: existing.id,
                    status,
                });
            }
        }

        match status {
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::PermanentlyFailed => {
                debug!(
                    transaction_id = %existing.id,
                    status = %status,
                    "Transaction already terminal; returning as-is"
                );
                Ok(existing)
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {
                if request.retry {
                    self.retry(existing).await
                } else {
                    Ok(existing)
                }
            }
            TransactionStatus::Timeout | TransactionStatus::Inconsistent => {
                info!(
                    transaction_id = %existing.id,
                    status = %status,
                    "Transaction in problematic status; attempting recovery"
                );
                self.recover(existing).await
            }
        }
    }

    async fn create(&self, request: TransactionRequest) -> Result<Transaction, TransactionError> {
        let mut tx = self.pool.begin().await?;

        let txn = Transaction::insert(
            &mut *tx,
            CreateTransaction {
                id: request.transaction_id,
                origin_system: request.origin_system.clone(),
                payload: request.payload,
                webhook_url: request.webhook_url,
                webhook_security_token: request.webhook_security_token,
            },
        )
        .await?;

        TransactionHistory::insert(
            &mut *tx,
            NewHistoryEntry {
                transaction_id: txn.id,
                previous_status: None,
                new_status: TransactionStatus::Pending,
                reason: "Transaction received".to_string(),
                changed_by: request.origin_system,
                context: None,
                attempt_number: 1,
                is_automatic: true,
            },
        )
        .await?;

        self.enqueue_event(
            &mut tx,
            &txn,
            EventType::TransactionCreated,
            TransactionStatus::Pending,
            None,
        )
        .await?;

        tx.commit().await?;

        info!(transaction_id = %txn.id, "Transaction created");
        Ok(txn)
    }

    /// Retry an in-flight transaction, failing it once the attempt
    /// ceiling is reached.
    pub async fn retry(&self, txn: Transaction) -> Result<Transaction, TransactionError> {
        if txn.attempt_count >= self.config.max_retry_attempts {
            warn!(
                transaction_id = %txn.id,
                attempts = txn.attempt_count,
                "Maximum retry attempts reached; failing transaction"
            );
            return self
                .fail(
                    txn.id,
                    json!({"reason": "Maximum retry attempts reached"}),
                    "Maximum retry attempts reached",
                    actors::SYSTEM,
                )
                .await;
        }

        let status = status_of(&txn)?;
        let mut tx = self.pool.begin().await?;

        let updated = Transaction::record_attempt(&mut *tx, txn.id)
            .await?
            .ok_or(TransactionError::NotFound(txn.id))?;

        TransactionHistory::insert(
            &mut *tx,
            NewHistoryEntry {
                transaction_id: txn.id,
                previous_status: Some(status),
                new_status: status,
                reason: "Retry attempt".to_string(),
                changed_by: actors::SYSTEM_RETRY.to_string(),
                context: None,
                attempt_number: updated.attempt_count,
                is_automatic: true,
            },
        )
        .await?;

        self.enqueue_event(&mut tx, &updated, EventType::TransactionRetry, status, Some(status))
            .await?;

        tx.commit().await?;

        info!(
            transaction_id = %updated.id,
            attempt = updated.attempt_count,
            "Transaction retry recorded"
        );
        Ok(updated)
    }

    /// Recover a transaction from `TIMEOUT`/`INCONSISTENT` back to
    /// `PENDING` for reprocessing.
    pub async fn recover(&self, txn: Transaction) -> Result<Transaction, TransactionError> {
        let previous = status_of(&txn)?;
        let mut tx = self.pool.begin().await?;

        let updated = Transaction::set_status(&mut *tx, txn.id, TransactionStatus::Pending, None)
            .await?
            .ok_or(TransactionError::NotFound(txn.id))?;
        let updated = Transaction::record_attempt(&mut *tx, updated.id)
            .await?
            .ok_or(TransactionError::NotFound(txn.id))?;

        TransactionHistory::insert(
            &mut *tx,
            NewHistoryEntry {
                transaction_id: txn.id,
                previous_status: Some(previous),
                new_status: TransactionStatus::Pending,
                reason: "Recovery attempt from problematic state".to_string(),
                changed_by: actors::SYSTEM_RECOVERY.to_string(),
                context: None,
                attempt_number: updated.attempt_count,
                is_automatic: true,
            },
        )
        .await?;

        self.enqueue_event(
            &mut tx,
            &updated,
            EventType::TransactionStatusChanged,
            TransactionStatus::Pending,
            Some(previous),
        )
        .await?;

        tx.commit().await?;

        info!(transaction_id = %updated.id, previous = %previous, "Transaction recovered");
        Ok(updated)
    }

    /// Update the status with transition validation, history and event.
    /// A no-op when the status is unchanged.
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: TransactionStatus,
        reason: &str,
        changed_by: &str,
    ) -> Result<Transaction, TransactionError> {
        let txn = self.get(id).await?;
        let mut tx = self.pool.begin().await?;
        let updated = self
            .apply_status_change(&mut tx, &txn, new_status, reason, changed_by, true, None, true)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Set the response payload and complete the transaction.
    pub async fn complete(
        &self,
        id: Uuid,
        response: serde_json::Value,
        changed_by: &str,
    ) -> Result<Transaction, TransactionError> {
        let txn = self.get(id).await?;
        let mut tx = self.pool.begin().await?;

        Transaction::set_response(&mut *tx, id, &response)
            .await?
            .ok_or(TransactionError::NotFound(id))?;

        let updated = self
            .apply_status_change(
                &mut tx,
                &txn,
                TransactionStatus::Completed,
                "Transaction processed successfully",
                changed_by,
                true,
                None,
                true,
            )
            .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Set error details and fail the transaction.
    pub async fn fail(
        &self,
        id: Uuid,
        error_details: serde_json::Value,
        reason: &str,
        changed_by: &str,
    ) -> Result<Transaction, TransactionError> {
        let txn = self.get(id).await?;
        let mut tx = self.pool.begin().await?;

        Transaction::set_error_details(&mut *tx, id, &error_details)
            .await?
            .ok_or(TransactionError::NotFound(id))?;

        let updated = self
            .apply_status_change(
                &mut tx,
                &txn,
                TransactionStatus::Failed,
                reason,
                changed_by,
                true,
                None,
                true,
            )
            .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Reconcile: ask the state manager for the likely actual status,
    /// apply it when different, and mark the row reconciled.
    pub async fn reconcile(&self, id: Uuid) -> Result<Transaction, TransactionError> {
        let txn = self.get(id).await?;
        let history = TransactionHistory::list_for_transaction(&self.pool, id).await?;
        let determined = self
            .state_manager
            .determine_actual_status(&txn, &history, Utc::now());
        let current = status_of(&txn)?;

        let mut tx = self.pool.begin().await?;

        if determined != current {
            // Reconciliation may land on statuses outside the automatic
            // graph (e.g. INCONSISTENT back to PROCESSING); the decision
            // is audited, so transition validation is skipped here.
            self.apply_status_change(
                &mut tx,
                &txn,
                determined,
                "Automatic reconciliation",
                actors::SYSTEM_RECONCILIATION,
                true,
                None,
                false,
            )
            .await?;
        }

        let updated = Transaction::set_reconciled(&mut *tx, id, true)
            .await?
            .ok_or(TransactionError::NotFound(id))?;

        let reconciled_event = TransactionEventMessage::new(
            EventType::TransactionReconciled,
            id,
            updated.origin_system.clone(),
            determined,
            Some(current),
            json!({"reconciled": true}),
        );
        OutboxEvent::insert(
            &mut *tx,
            &self.event_topic,
            &reconciled_event.partition_key(),
            &serde_json::to_value(&reconciled_event)?,
        )
        .await?;

        tx.commit().await?;

        info!(transaction_id = %id, status = %updated.status, "Transaction reconciled");
        Ok(updated)
    }

    /// Operator override: set any target status with a non-automatic
    /// audit entry. Bypasses the automatic-transition check.
    pub async fn manually_handle(
        &self,
        id: Uuid,
        target_status: TransactionStatus,
        notes: &str,
        admin_user: &str,
    ) -> Result<Transaction, TransactionError> {
        let txn = self.get(id).await?;
        let current = status_of(&txn)?;

        info!(
            transaction_id = %id,
            admin = %admin_user,
            from = %current,
            to = %target_status,
            "Manual transaction resolution"
        );

        let mut tx = self.pool.begin().await?;

        Transaction::set_notes(&mut *tx, id, notes)
            .await?
            .ok_or(TransactionError::NotFound(id))?;

        TransactionHistory::insert(
            &mut *tx,
            NewHistoryEntry {
                transaction_id: id,
                previous_status: Some(current),
                new_status: target_status,
                reason: "Manual resolution by administrator".to_string(),
                changed_by: admin_user.to_string(),
                context: Some(notes.to_string()),
                attempt_number: txn.attempt_count,
                is_automatic: false,
            },
        )
        .await?;

        let completion_at = target_status.is_terminal().then(Utc::now);
        let updated = Transaction::set_status(&mut *tx, id, target_status, completion_at)
            .await?
            .ok_or(TransactionError::NotFound(id))?;

        self.enqueue_event(
            &mut tx,
            &updated,
            EventType::TransactionManualResolution,
            target_status,
            Some(current),
        )
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, TransactionError> {
        Transaction::find_by_id(&self.pool, id)
            .await?
            .ok_or(TransactionError::NotFound(id))
    }

    pub async fn get_by_id_and_origin(
        &self,
        id: Uuid,
        origin_system: &str,
    ) -> Result<Transaction, TransactionError> {
        Transaction::find_by_id_and_origin(&self.pool, id, origin_system)
            .await?
            .ok_or(TransactionError::NotFound(id))
    }

    pub async fn get_history(
        &self,
        id: Uuid,
    ) -> Result<Vec<TransactionHistory>, TransactionError> {
        // Distinguish "no history yet" from "no such transaction".
        let _ = self.get(id).await?;
        Ok(TransactionHistory::list_for_transaction(&self.pool, id).await?)
    }

    pub async fn search(
        &self,
        origin_system: Option<&str>,
        status: Option<TransactionStatus>,
        created_from: Option<chrono::DateTime<Utc>>,
        created_to: Option<chrono::DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, TransactionError> {
        Ok(Transaction::search(
            &self.pool,
            origin_system,
            status,
            created_from,
            created_to,
            limit,
            offset,
        )
        .await?)
    }

    /// Counts by status plus the overall total.
    pub async fn stats(&self) -> Result<serde_json::Value, TransactionError> {
        let counts: Vec<StatusCount> = Transaction::count_by_status(&self.pool).await?;
        let total = Transaction::count_all(&self.pool).await?;

        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|c| (c.status, json!(c.count)))
            .collect();

        Ok(json!({
            "countsByStatus": by_status,
            "totalTransactions": total,
        }))
    }

    /// Shared write path: status column + history row + outbox event.
    #[allow(clippy::too_many_arguments)]
    async fn apply_status_change(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        txn: &Transaction,
        new_status: TransactionStatus,
        reason: &str,
        changed_by: &str,
        is_automatic: bool,
        context: Option<String>,
        validate: bool,
    ) -> Result<Transaction, TransactionError> {
        let previous = status_of(txn)?;

        if previous == new_status {
            debug!(
                transaction_id = %txn.id,
                status = %new_status,
                "Status unchanged; skipping update"
            );
            return Ok(txn.clone());
        }

        if validate && !previous.can_transition_to(new_status) {
            return Err(TransactionError::IllegalTransition {
                id: txn.id,
                from: previous,
                to: new_status,
            });
        }

        info!(
            transaction_id = %txn.id,
            from = %previous,
            to = %new_status,
            reason = %reason,
            "Updating transaction status"
        );

        let completion_at = new_status.is_terminal().then(Utc::now);
        let updated = Transaction::set_status(&mut **tx, txn.id, new_status, completion_at)
            .await?
            .ok_or(TransactionError::NotFound(txn.id))?;

        TransactionHistory::insert(
            &mut **tx,
            NewHistoryEntry {
                transaction_id: txn.id,
                previous_status: Some(previous),
                new_status,
                reason: reason.to_string(),
                changed_by: changed_by.to_string(),
                context,
                attempt_number: updated.attempt_count,
                is_automatic,
            },
        )
        .await?;

        self.enqueue_event(
            tx,
            &updated,
            EventType::for_status_change(new_status),
            new_status,
            Some(previous),
        )
        .await?;

        Ok(updated)
    }

    /// Insert a transaction event into the outbox inside the caller's
    /// database transaction.
    async fn enqueue_event(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        txn: &Transaction,
        event_type: EventType,
        current_status: TransactionStatus,
        previous_status: Option<TransactionStatus>,
    ) -> Result<(), TransactionError> {
        let message = TransactionEventMessage::new(
            event_type,
            txn.id,
            txn.origin_system.clone(),
            current_status,
            previous_status,
            transaction_event_payload(txn),
        );

        OutboxEvent::insert(
            &mut **tx,
            &self.event_topic,
            &message.partition_key(),
            &serde_json::to_value(&message)?,
        )
        .await?;

        Ok(())
    }
}

/// Event payload: a transaction snapshot filtered by status, so
/// responses only travel for completed work and error details only for
/// failed work.
fn transaction_event_payload(txn: &Transaction) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert("created_at".into(), json!(txn.created_at));
    data.insert("updated_at".into(), json!(txn.updated_at));
    data.insert("attempt_count".into(), json!(txn.attempt_count));
    if let Some(completion_at) = txn.completion_at {
        data.insert("completed_at".into(), json!(completion_at));
    }
    match txn.status_enum() {
        Some(TransactionStatus::Completed) => {
            if let Some(response) = &txn.response {
                data.insert("response".into(), response.clone());
            }
        }
        Some(TransactionStatus::Failed | TransactionStatus::PermanentlyFailed) => {
            if let Some(error_details) = &txn.error_details {
                data.insert("error_details".into(), error_details.clone());
            }
        }
        _ => {}
    }
    serde_json::Value::Object(data)
}

fn status_of(txn: &Transaction) -> Result<TransactionStatus, TransactionError> {
    txn.status_enum().ok_or_else(|| TransactionError::CorruptStatus {
        id: txn.id,
        raw: txn.status.clone(),
    })
}
