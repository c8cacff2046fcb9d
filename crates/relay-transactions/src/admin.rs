//! Admin facade over transaction operations.
//!
//! The external admin surface calls these contracts; everything here is
//! a thin composition over the service so overrides stay audited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use relay_core::TransactionStatus;
use relay_db::models::{Transaction, TransactionHistory};

use crate::error::TransactionError;
use crate::service::TransactionService;

/// Query and override operations for operators.
pub struct AdminFacade {
    service: Arc<TransactionService>,
}

impl AdminFacade {
    #[must_use]
    pub fn new(service: Arc<TransactionService>) -> Self {
        Self { service }
    }

    #[must_use]
    pub fn service(&self) -> &TransactionService {
        &self.service
    }

    pub async fn get_transaction(&self, id: Uuid) -> Result<Transaction, TransactionError> {
        self.service.get(id).await
    }

    pub async fn get_history(
        &self,
        id: Uuid,
    ) -> Result<Vec<TransactionHistory>, TransactionError> {
        self.service.get_history(id).await
    }

    pub async fn search(
        &self,
        origin_system: Option<&str>,
        status: Option<TransactionStatus>,
        created_from: Option<DateTime<Utc>>,
        created_to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, TransactionError> {
        self.service
            .search(origin_system, status, created_from, created_to, limit, offset)
            .await
    }

    pub async fn stats(&self) -> Result<serde_json::Value, TransactionError> {
        self.service.stats().await
    }

    /// Status-transition counts over a time window.
    pub async fn period_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<serde_json::Value, TransactionError> {
        let transitions =
            TransactionHistory::transition_counts_between(self.service.pool(), from, to).await?;

        let by_status: serde_json::Map<String, serde_json::Value> = transitions
            .into_iter()
            .map(|t| (t.new_status, json!(t.count)))
            .collect();

        Ok(json!({
            "from": from,
            "to": to,
            "status_transitions": by_status,
        }))
    }

    /// Operator override to a target status, with notes.
    pub async fn resolve_transaction(
        &self,
        id: Uuid,
        target_status: TransactionStatus,
        notes: &str,
        admin_user: &str,
    ) -> Result<Transaction, TransactionError> {
        self.service
            .manually_handle(id, target_status, notes, admin_user)
            .await
    }

    /// Force a reconciliation of one transaction.
    pub async fn reconcile_transaction(&self, id: Uuid) -> Result<Transaction, TransactionError> {
        self.service.reconcile(id).await
    }
}
