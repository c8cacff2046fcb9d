//! The periodic transaction sweep.
//!
//! Each pass moves stalled rows forward, reconciles problematic ones,
//! retries eligible work and routes anomalies to the alert dispatcher.
//! An atomic guard per task kind ensures a slow pass never overlaps
//! with the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info};

use relay_core::{actors, EventType, TransactionStatus};
use relay_db::models::{OutboxEvent, Transaction, TransactionHistory};
use relay_events::message::TransactionEventMessage;
use relay_transactions::{TransactionConfig, TransactionService};

use crate::alert::AlertDispatcher;
use crate::anomaly::AnomalyDetector;
use crate::error::MonitorError;

/// Rows examined per sweep phase.
const SWEEP_BATCH_SIZE: i64 = 200;

/// Outcome counters for one monitoring pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub pending_resolved: u32,
    pub processing_resolved: u32,
    pub timeouts_detected: u32,
    pub auto_retried: u32,
    pub manual_intervention_required: u32,
}

/// Outcome counters for a full reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconciliationReport {
    pub processed: u32,
    pub reconciled: u32,
    pub manual_intervention_required: u32,
}

/// Periodic sweep over transaction state.
pub struct MonitorService {
    service: Arc<TransactionService>,
    detector: AnomalyDetector,
    alerts: AlertDispatcher,
    config: TransactionConfig,
    max_auto_retries: i32,
    /// Anomaly count above which alerts are raised.
    alert_threshold: usize,
    event_topic: String,
    sweep_running: AtomicBool,
    reconciliation_running: AtomicBool,
}

impl MonitorService {
    #[must_use]
    pub fn new(
        service: Arc<TransactionService>,
        detector: AnomalyDetector,
        alerts: AlertDispatcher,
        config: TransactionConfig,
        max_auto_retries: i32,
        alert_threshold: usize,
        event_topic: impl Into<String>,
    ) -> Self {
        Self {
            service,
            detector,
            alerts,
            config,
            max_auto_retries,
            alert_threshold,
            event_topic: event_topic.into(),
            sweep_running: AtomicBool::new(false),
            reconciliation_running: AtomicBool::new(false),
        }
    }

    fn pool(&self) -> &PgPool {
        self.service.pool()
    }

    /// Run one monitoring pass. Errors with `SweepInProgress` if the
    /// previous pass has not finished.
    pub async fn run_sweep(&self) -> Result<SweepReport, MonitorError> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::SweepInProgress);
        }

        let result = self.sweep_inner().await;
        self.sweep_running.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            self.alerts
                .send_critical_error_alert(&e.to_string(), "scheduled transaction monitoring");
        }
        result
    }

    async fn sweep_inner(&self) -> Result<SweepReport, MonitorError> {
        info!("Starting transaction monitoring pass");
        let mut report = SweepReport::default();

        report.pending_resolved = self.check_pending().await;
        report.processing_resolved = self.check_processing().await;
        report.timeouts_detected = self.reconcile_problematic().await;
        report.auto_retried = self.attempt_auto_retries().await;
        report.manual_intervention_required = self.check_for_manual_intervention().await?;

        info!(
            pending_resolved = report.pending_resolved,
            processing_resolved = report.processing_resolved,
            timeouts_detected = report.timeouts_detected,
            auto_retried = report.auto_retried,
            manual_intervention_required = report.manual_intervention_required,
            "Completed transaction monitoring pass"
        );
        Ok(report)
    }

    /// Stalled `PENDING` rows move to `TIMEOUT`.
    async fn check_pending(&self) -> u32 {
        let threshold = Utc::now() - self.config.pending_timeout;
        let stalled = match Transaction::find_by_status_created_before(
            self.pool(),
            TransactionStatus::Pending,
            threshold,
            SWEEP_BATCH_SIZE,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query stalled PENDING transactions");
                return 0;
            }
        };

        if !stalled.is_empty() {
            info!(count = stalled.len(), "Found stalled PENDING transactions");
        }

        let mut resolved = 0;
        for txn in stalled {
            match self
                .service
                .update_status(
                    txn.id,
                    TransactionStatus::Timeout,
                    "Transaction timed out in PENDING state",
                    actors::SYSTEM_MONITOR,
                )
                .await
            {
                Ok(_) => resolved += 1,
                Err(e) => {
                    error!(transaction_id = %txn.id, error = %e, "Failed to time out PENDING transaction");
                    self.alerts.send_alert(
                        "Monitor Error",
                        &format!("Error handling stalled PENDING transaction {}", txn.id),
                    );
                }
            }
        }
        resolved
    }

    /// Stalled `PROCESSING` rows get a determined status, falling back
    /// to `TIMEOUT` when no better evidence exists.
    async fn check_processing(&self) -> u32 {
        let threshold = Utc::now() - self.config.processing_timeout;
        let stalled = match Transaction::find_stalled_processing(self.pool(), threshold, SWEEP_BATCH_SIZE)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query stalled PROCESSING transactions");
                return 0;
            }
        };

        if !stalled.is_empty() {
            info!(count = stalled.len(), "Found stalled PROCESSING transactions");
        }

        let mut resolved = 0;
        for txn in stalled {
            let history = match TransactionHistory::list_for_transaction(self.pool(), txn.id).await {
                Ok(h) => h,
                Err(e) => {
                    error!(transaction_id = %txn.id, error = %e, "Failed to load history");
                    continue;
                }
            };

            let determined = self
                .service
                .state_manager()
                .determine_actual_status(&txn, &history, Utc::now());

            let (status, reason) = if determined != TransactionStatus::Processing {
                (determined, "State determined by monitor after PROCESSING timeout")
            } else {
                (TransactionStatus::Timeout, "Transaction timed out in PROCESSING state")
            };

            match self
                .service
                .update_status(txn.id, status, reason, actors::SYSTEM_MONITOR)
                .await
            {
                Ok(_) => resolved += 1,
                Err(e) => {
                    error!(transaction_id = %txn.id, error = %e, "Failed to resolve PROCESSING transaction");
                    self.alerts.send_alert(
                        "Monitor Error",
                        &format!("Error handling stalled PROCESSING transaction {}", txn.id),
                    );
                }
            }
        }
        resolved
    }

    /// Reconcile every un-reconciled `TIMEOUT`/`INCONSISTENT` row.
    async fn reconcile_problematic(&self) -> u32 {
        let rows = match Transaction::find_unreconciled_problematic(self.pool(), SWEEP_BATCH_SIZE).await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query problematic transactions");
                return 0;
            }
        };

        let mut reconciled = 0;
        for txn in rows {
            match self.service.reconcile(txn.id).await {
                Ok(_) => reconciled += 1,
                Err(e) => {
                    error!(transaction_id = %txn.id, error = %e, "Reconciliation failed");
                    self.alerts.send_alert(
                        "Monitor Error",
                        &format!("Error reconciling transaction {}", txn.id),
                    );
                }
            }
        }
        reconciled
    }

    /// Retry transactions the state manager deems eligible, within the
    /// auto-retry ceiling.
    async fn attempt_auto_retries(&self) -> u32 {
        let now = Utc::now();
        let mut candidates = match Transaction::find_by_status(
            self.pool(),
            TransactionStatus::Pending,
            SWEEP_BATCH_SIZE,
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query retry candidates");
                return 0;
            }
        };
        match Transaction::find_by_status(self.pool(), TransactionStatus::Timeout, SWEEP_BATCH_SIZE)
            .await
        {
            Ok(rows) => candidates.extend(rows),
            Err(e) => error!(error = %e, "Failed to query TIMEOUT retry candidates"),
        }

        let mut retried = 0;
        for txn in candidates {
            if txn.attempt_count >= self.max_auto_retries {
                continue;
            }
            if !self.service.state_manager().should_retry(&txn, now) {
                continue;
            }

            match self.service.retry(txn).await {
                Ok(_) => retried += 1,
                Err(e) => {
                    error!(error = %e, "Auto-retry failed");
                    self.alerts
                        .send_alert("Monitor Error", &format!("Error auto-retrying transaction: {e}"));
                }
            }
        }
        retried
    }

    /// Detect anomalies and raise alerts when the count crosses the
    /// configured threshold.
    async fn check_for_manual_intervention(&self) -> Result<u32, MonitorError> {
        let prioritized = self.detector.prioritized(SWEEP_BATCH_SIZE as usize).await?;
        let count = prioritized.len();

        if count > self.alert_threshold {
            self.alerts.send_alert(
                "Manual Intervention Required",
                &format!("Found {count} transactions that may require manual intervention."),
            );
            for (txn, anomalies) in &prioritized {
                self.alerts.send_transaction_alert(txn, anomalies);
            }
        }

        Ok(count as u32)
    }

    /// Full reconciliation pass over every non-terminal transaction.
    /// Emits system events at the boundaries.
    pub async fn run_reconciliation_pass(&self) -> Result<ReconciliationReport, MonitorError> {
        if self
            .reconciliation_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitorError::SweepInProgress);
        }

        let result = self.reconciliation_inner().await;
        self.reconciliation_running.store(false, Ordering::SeqCst);
        result
    }

    async fn reconciliation_inner(&self) -> Result<ReconciliationReport, MonitorError> {
        info!("Starting system-wide reconciliation pass");
        self.publish_system_event(EventType::SystemReconciliationStart, json!({}))
            .await?;

        let rows = Transaction::find_non_terminal(self.pool(), SWEEP_BATCH_SIZE * 10).await?;
        let mut report = ReconciliationReport {
            processed: rows.len() as u32,
            ..Default::default()
        };

        for txn in rows {
            match self.service.reconcile(txn.id).await {
                Ok(_) => report.reconciled += 1,
                Err(e) => {
                    error!(transaction_id = %txn.id, error = %e, "Reconciliation failed");
                }
            }
        }

        report.manual_intervention_required =
            self.detector.prioritized(SWEEP_BATCH_SIZE as usize).await?.len() as u32;

        self.publish_system_event(
            EventType::SystemReconciliationComplete,
            json!({
                "processed": report.processed,
                "reconciled": report.reconciled,
                "manual_intervention_required": report.manual_intervention_required,
            }),
        )
        .await?;

        info!(
            processed = report.processed,
            reconciled = report.reconciled,
            "Completed system-wide reconciliation pass"
        );
        Ok(report)
    }

    /// Transaction counts, rates and anomaly figures for health checks.
    pub async fn system_metrics(&self) -> Result<serde_json::Value, MonitorError> {
        let counts = Transaction::count_by_status(self.pool()).await?;
        let total = Transaction::count_all(self.pool()).await?;

        let mut by_status = serde_json::Map::new();
        let mut completed = 0i64;
        let mut failed = 0i64;
        for c in counts {
            if c.status == TransactionStatus::Completed.as_str() {
                completed = c.count;
            }
            if c.status == TransactionStatus::Failed.as_str() {
                failed = c.count;
            }
            by_status.insert(c.status, json!(c.count));
        }

        let completion_rate = rate(completed, total);
        let failure_rate = rate(failed, total);
        let anomalies = self.detector.statistics().await?;

        Ok(json!({
            "transactions_by_status": by_status,
            "total_transactions": total,
            "completion_rate": completion_rate,
            "failure_rate": failure_rate,
            "anomalies": anomalies,
        }))
    }

    /// Whether a sweep is currently in flight.
    #[must_use]
    pub fn sweep_in_progress(&self) -> bool {
        self.sweep_running.load(Ordering::SeqCst)
    }

    async fn publish_system_event(
        &self,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<(), MonitorError> {
        let message = TransactionEventMessage::system(event_type, "relay", payload);
        OutboxEvent::insert(
            self.pool(),
            &self.event_topic,
            &message.partition_key(),
            &serde_json::to_value(&message)?,
        )
        .await?;
        Ok(())
    }
}

/// Percentage rounded to two decimal places.
fn rate(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 10000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_rounding() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(5, 5), 100.0);
    }

    #[test]
    fn test_sweep_report_serializes() {
        let report = SweepReport {
            pending_resolved: 1,
            processing_resolved: 2,
            timeouts_detected: 3,
            auto_retried: 4,
            manual_intervention_required: 5,
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["auto_retried"], 4);
    }
}
