//! Anomaly detection over persisted transaction state.
//!
//! A union of independent rules; each detected transaction is annotated
//! with every rule it matched so alerts can be prioritised by severity.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use relay_core::TransactionStatus;
use relay_db::models::{Transaction, TransactionHistory};

/// Thresholds for the anomaly rules.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub pending_threshold: Duration,
    pub processing_threshold: Duration,
    pub retry_threshold: i32,
    pub state_change_threshold: i64,
    /// Cap on rows examined per detection pass.
    pub scan_limit: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            pending_threshold: Duration::minutes(30),
            processing_threshold: Duration::minutes(60),
            retry_threshold: 5,
            state_change_threshold: 10,
            scan_limit: 500,
        }
    }
}

/// Detects transactions in anomalous states.
pub struct AnomalyDetector {
    pool: PgPool,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    #[must_use]
    pub fn new(pool: PgPool, config: AnomalyConfig) -> Self {
        Self { pool, config }
    }

    /// Union of all rules, deduplicated by transaction id.
    pub async fn detect_all(&self) -> Result<Vec<Transaction>, sqlx::Error> {
        let now = Utc::now();
        let limit = self.config.scan_limit;
        let mut found: HashMap<Uuid, Transaction> = HashMap::new();

        let long_pending = Transaction::find_by_status_created_before(
            &self.pool,
            TransactionStatus::Pending,
            now - self.config.pending_threshold,
            limit,
        )
        .await?;

        let long_processing =
            Transaction::find_stalled_processing(&self.pool, now - self.config.processing_threshold, limit)
                .await?;

        let excessive_retries =
            Transaction::find_excessive_attempts(&self.pool, self.config.retry_threshold, limit)
                .await?;

        let missing_payload =
            Transaction::find_terminal_missing_payload(&self.pool, limit).await?;

        let unreconciled = Transaction::find_unreconciled_problematic(&self.pool, limit).await?;

        for txn in long_pending
            .into_iter()
            .chain(long_processing)
            .chain(excessive_retries)
            .chain(missing_payload)
            .chain(unreconciled)
        {
            found.entry(txn.id).or_insert(txn);
        }

        // History-based rules need per-transaction lookups.
        let busy_ids = TransactionHistory::transactions_with_entries_at_least(
            &self.pool,
            self.config.state_change_threshold,
            limit,
        )
        .await?;
        for id in busy_ids {
            if !found.contains_key(&id) {
                if let Some(txn) = Transaction::find_by_id(&self.pool, id).await? {
                    found.insert(id, txn);
                }
            }
        }

        debug!(count = found.len(), "Anomaly detection pass complete");
        Ok(found.into_values().collect())
    }

    /// Annotate one transaction with every rule it matches.
    #[must_use]
    pub fn analyze(
        &self,
        txn: &Transaction,
        history: &[TransactionHistory],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let mut anomalies = BTreeMap::new();
        let status = txn.status_enum();

        if status == Some(TransactionStatus::Pending) {
            let dwell = now - txn.created_at;
            if dwell > self.config.pending_threshold {
                anomalies.insert(
                    "long_pending".to_string(),
                    format!(
                        "pending for {} minutes (threshold {})",
                        dwell.num_minutes(),
                        self.config.pending_threshold.num_minutes()
                    ),
                );
            }
        }

        if status == Some(TransactionStatus::Processing) {
            let reference = txn.last_attempt_at.unwrap_or(txn.created_at);
            let idle = now - reference;
            if idle > self.config.processing_threshold {
                anomalies.insert(
                    "long_processing".to_string(),
                    format!(
                        "processing idle for {} minutes (threshold {})",
                        idle.num_minutes(),
                        self.config.processing_threshold.num_minutes()
                    ),
                );
            }
        }

        if txn.attempt_count >= self.config.retry_threshold
            && status.is_some_and(|s| !s.is_terminal())
        {
            anomalies.insert(
                "excessive_retries".to_string(),
                format!(
                    "{} attempts (threshold {})",
                    txn.attempt_count, self.config.retry_threshold
                ),
            );
        }

        if history.len() as i64 >= self.config.state_change_threshold {
            anomalies.insert(
                "excessive_state_changes".to_string(),
                format!(
                    "{} state changes (threshold {})",
                    history.len(),
                    self.config.state_change_threshold
                ),
            );
        }

        if let Some((transition, count)) = most_repeated_transition(history) {
            if count > 2 {
                anomalies.insert(
                    "oscillating_states".to_string(),
                    format!("transition {transition} observed {count} times"),
                );
            }
        }

        if status == Some(TransactionStatus::Completed) && txn.response.is_none() {
            anomalies.insert(
                "missing_response".to_string(),
                "COMPLETED without response data".to_string(),
            );
        }
        if status == Some(TransactionStatus::Failed) && txn.error_details.is_none() {
            anomalies.insert(
                "missing_error_details".to_string(),
                "FAILED without error details".to_string(),
            );
        }

        if status.is_some_and(|s| s.is_problematic()) && !txn.is_reconciled {
            anomalies.insert(
                "unreconciled_problematic".to_string(),
                format!("{} without a reconciliation pass", txn.status),
            );
        }

        anomalies
    }

    /// Anomalous transactions sorted by severity: number of matched
    /// rules descending, then most recently updated first.
    pub async fn prioritized(&self, limit: usize) -> Result<Vec<(Transaction, BTreeMap<String, String>)>, sqlx::Error> {
        let now = Utc::now();
        let candidates = self.detect_all().await?;

        let mut annotated = Vec::with_capacity(candidates.len());
        for txn in candidates {
            let history = TransactionHistory::list_for_transaction(&self.pool, txn.id).await?;
            let anomalies = self.analyze(&txn, &history, now);
            if !anomalies.is_empty() {
                annotated.push((txn, anomalies));
            }
        }

        annotated.sort_by(|(a_txn, a), (b_txn, b)| {
            b.len()
                .cmp(&a.len())
                .then(b_txn.updated_at.cmp(&a_txn.updated_at))
        });
        annotated.truncate(limit);
        Ok(annotated)
    }

    /// Aggregate anomaly statistics for health reporting.
    pub async fn statistics(&self) -> Result<serde_json::Value, sqlx::Error> {
        let now = Utc::now();
        let candidates = self.detect_all().await?;

        let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
        let mut total = 0i64;

        for txn in &candidates {
            let history = TransactionHistory::list_for_transaction(&self.pool, txn.id).await?;
            let anomalies = self.analyze(txn, &history, now);
            if anomalies.is_empty() {
                continue;
            }
            total += 1;
            for rule in anomalies.keys() {
                *by_type.entry(rule.clone()).or_default() += 1;
            }
            *by_status.entry(txn.status.clone()).or_default() += 1;
        }

        Ok(json!({
            "total_anomalies": total,
            "anomaly_types": by_type,
            "status_distribution": by_status,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }
}

/// The most frequent `(from, to)` transition in a history, if any.
/// Fewer than three entries cannot oscillate.
fn most_repeated_transition(history: &[TransactionHistory]) -> Option<(String, usize)> {
    if history.len() < 3 {
        return None;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for pair in history.windows(2) {
        let transition = format!("{}->{}", pair[0].new_status, pair[1].new_status);
        *counts.entry(transition).or_default() += 1;
    }

    counts.into_iter().max_by_key(|(_, count)| *count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        // The pool is only needed for query paths; analyze() is pure.
        let pool = PgPool::connect_lazy("postgres://relay@localhost/relay")
            .expect("lazy pool");
        AnomalyDetector::new(pool, AnomalyConfig::default())
    }

    fn txn(status: TransactionStatus, age_minutes: i64, attempts: i32) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            origin_system: "billing".into(),
            status: status.as_str().into(),
            payload: json!({}),
            response: None,
            error_details: None,
            attempt_count: attempts,
            last_attempt_at: None,
            completion_at: None,
            webhook_url: None,
            webhook_security_token: None,
            created_at: now - Duration::minutes(age_minutes),
            updated_at: now,
            is_reconciled: false,
            notes: None,
            version: 0,
        }
    }

    fn entry(txn_id: Uuid, status: TransactionStatus) -> TransactionHistory {
        TransactionHistory {
            id: 0,
            transaction_id: txn_id,
            previous_status: None,
            new_status: status.as_str().into(),
            changed_at: Utc::now(),
            reason: "test".into(),
            changed_by: "SYSTEM".into(),
            context: None,
            attempt_number: 1,
            is_automatic: true,
        }
    }

    #[tokio::test]
    async fn test_long_pending_detected() {
        let d = detector();
        let anomalies = d.analyze(&txn(TransactionStatus::Pending, 45, 1), &[], Utc::now());
        assert!(anomalies.contains_key("long_pending"));
    }

    #[tokio::test]
    async fn test_fresh_pending_clean() {
        let d = detector();
        let anomalies = d.analyze(&txn(TransactionStatus::Pending, 5, 1), &[], Utc::now());
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_excessive_retries_only_non_terminal() {
        let d = detector();
        let anomalies = d.analyze(&txn(TransactionStatus::Timeout, 5, 6), &[], Utc::now());
        assert!(anomalies.contains_key("excessive_retries"));

        let mut completed = txn(TransactionStatus::Completed, 5, 6);
        completed.response = Some(json!({"ok": true}));
        let anomalies = d.analyze(&completed, &[], Utc::now());
        assert!(!anomalies.contains_key("excessive_retries"));
    }

    #[tokio::test]
    async fn test_missing_payload_rules() {
        let d = detector();
        let completed = txn(TransactionStatus::Completed, 5, 1);
        assert!(d
            .analyze(&completed, &[], Utc::now())
            .contains_key("missing_response"));

        let failed = txn(TransactionStatus::Failed, 5, 1);
        assert!(d
            .analyze(&failed, &[], Utc::now())
            .contains_key("missing_error_details"));
    }

    #[tokio::test]
    async fn test_unreconciled_problematic() {
        let d = detector();
        let anomalies = d.analyze(&txn(TransactionStatus::Inconsistent, 5, 1), &[], Utc::now());
        assert!(anomalies.contains_key("unreconciled_problematic"));

        let mut reconciled = txn(TransactionStatus::Inconsistent, 5, 1);
        reconciled.is_reconciled = true;
        let anomalies = d.analyze(&reconciled, &[], Utc::now());
        assert!(!anomalies.contains_key("unreconciled_problematic"));
    }

    #[tokio::test]
    async fn test_oscillation_detected() {
        let d = detector();
        let t = txn(TransactionStatus::Pending, 5, 1);
        // Pending -> Timeout -> Pending -> Timeout -> Pending -> Timeout:
        // the Pending->Timeout transition occurs three times.
        let history = vec![
            entry(t.id, TransactionStatus::Pending),
            entry(t.id, TransactionStatus::Timeout),
            entry(t.id, TransactionStatus::Pending),
            entry(t.id, TransactionStatus::Timeout),
            entry(t.id, TransactionStatus::Pending),
            entry(t.id, TransactionStatus::Timeout),
        ];
        let anomalies = d.analyze(&t, &history, Utc::now());
        assert!(anomalies.contains_key("oscillating_states"));
    }

    #[tokio::test]
    async fn test_two_repeats_not_oscillation() {
        let d = detector();
        let t = txn(TransactionStatus::Pending, 5, 1);
        let history = vec![
            entry(t.id, TransactionStatus::Pending),
            entry(t.id, TransactionStatus::Timeout),
            entry(t.id, TransactionStatus::Pending),
            entry(t.id, TransactionStatus::Timeout),
        ];
        let anomalies = d.analyze(&t, &history, Utc::now());
        assert!(!anomalies.contains_key("oscillating_states"));
    }

    #[tokio::test]
    async fn test_excessive_state_changes() {
        let d = detector();
        let t = txn(TransactionStatus::Pending, 5, 1);
        let history: Vec<_> = (0..10).map(|_| entry(t.id, TransactionStatus::Pending)).collect();
        let anomalies = d.analyze(&t, &history, Utc::now());
        assert!(anomalies.contains_key("excessive_state_changes"));
    }
}
