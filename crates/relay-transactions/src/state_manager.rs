//! State determination and retry eligibility.
//!
//! Reconciliation works from partial evidence: the history log, the
//! presence of response or error payloads, and how long the row has
//! dwelt in its current status. The free-text evidence matching is a
//! replaceable rule so deployments can swap in stricter signals.

use chrono::{DateTime, Utc};

use relay_core::TransactionStatus;
use relay_db::models::{Transaction, TransactionHistory};

use crate::config::TransactionConfig;

/// Pluggable rule for reading completion/failure evidence out of
/// free-text history fields.
pub trait EvidenceRule: Send + Sync {
    fn indicates_completion(&self, text: &str) -> bool;
    fn indicates_failure(&self, text: &str) -> bool;
}

/// Default rule: case-insensitive substring matching, as the upstream
/// systems write human phrases like "completed downstream" or
/// "gateway error" into reason fields.
#[derive(Debug, Clone, Default)]
pub struct SubstringEvidence;

impl EvidenceRule for SubstringEvidence {
    fn indicates_completion(&self, text: &str) -> bool {
        text.to_lowercase().contains("complet")
    }

    fn indicates_failure(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("fail") || lower.contains("error")
    }
}

/// Determines the likely actual status of ambiguous transactions.
pub struct StateManager {
    config: TransactionConfig,
    evidence: Box<dyn EvidenceRule>,
}

impl StateManager {
    #[must_use]
    pub fn new(config: TransactionConfig) -> Self {
        Self {
            config,
            evidence: Box::new(SubstringEvidence),
        }
    }

    /// Replace the evidence rule.
    #[must_use]
    pub fn with_evidence_rule(mut self, rule: Box<dyn EvidenceRule>) -> Self {
        self.evidence = rule;
        self
    }

    /// Whether the row has exceeded its dwell threshold.
    ///
    /// `PENDING` is measured from creation; `PROCESSING` from the last
    /// attempt when one exists, otherwise from creation.
    #[must_use]
    pub fn is_timed_out(&self, txn: &Transaction, now: DateTime<Utc>) -> bool {
        match txn.status_enum() {
            Some(TransactionStatus::Pending) => {
                now - txn.created_at > self.config.pending_timeout
            }
            Some(TransactionStatus::Processing) => {
                let reference = txn.last_attempt_at.unwrap_or(txn.created_at);
                now - reference.max(txn.created_at) > self.config.processing_timeout
            }
            _ => false,
        }
    }

    /// Determine the most likely actual status, in priority order:
    /// terminal, timed out, completion evidence, failure evidence, the
    /// inconsistent-analysis chain, then keep current.
    #[must_use]
    pub fn determine_actual_status(
        &self,
        txn: &Transaction,
        history: &[TransactionHistory],
        now: DateTime<Utc>,
    ) -> TransactionStatus {
        let Some(current) = txn.status_enum() else {
            return TransactionStatus::Inconsistent;
        };

        if current.is_terminal() {
            return current;
        }

        if self.is_timed_out(txn, now) {
            tracing::info!(
                transaction_id = %txn.id,
                status = %current,
                "Transaction has timed out in its current status"
            );
            return TransactionStatus::Timeout;
        }

        // Evidence only matters once the row left its happy path; a
        // fresh PENDING row stays put.
        if current != TransactionStatus::Pending {
            if self.has_completion_evidence(history) {
                return TransactionStatus::Completed;
            }
            if self.has_failure_evidence(history) {
                return TransactionStatus::Failed;
            }
        }

        if current == TransactionStatus::Inconsistent {
            return self.analyze_inconsistent(txn, history, now);
        }

        current
    }

    /// Whether the transaction may be retried automatically.
    #[must_use]
    pub fn should_retry(&self, txn: &Transaction, now: DateTime<Utc>) -> bool {
        let Some(status) = txn.status_enum() else {
            return false;
        };

        if status.is_terminal() {
            return false;
        }

        if txn.attempt_count >= self.config.max_retry_attempts {
            return false;
        }

        match status {
            TransactionStatus::Timeout => now - txn.created_at < chrono::Duration::minutes(30),
            TransactionStatus::Pending => true,
            TransactionStatus::Processing => self.is_timed_out(txn, now),
            // Ambiguous outcomes never retry without reconciliation.
            TransactionStatus::Inconsistent => false,
            _ => false,
        }
    }

    fn has_completion_evidence(&self, history: &[TransactionHistory]) -> bool {
        history
            .iter()
            .any(|h| h.new_status_enum() == Some(TransactionStatus::Completed))
            || history.iter().any(|h| {
                h.context
                    .as_deref()
                    .is_some_and(|c| self.evidence.indicates_completion(c))
                    || self.evidence.indicates_completion(&h.reason)
            })
    }

    fn has_failure_evidence(&self, history: &[TransactionHistory]) -> bool {
        history
            .iter()
            .any(|h| h.new_status_enum() == Some(TransactionStatus::Failed))
            || history.iter().any(|h| {
                h.context
                    .as_deref()
                    .is_some_and(|c| self.evidence.indicates_failure(c))
                    || self.evidence.indicates_failure(&h.reason)
            })
    }

    /// Resolution chain for explicitly inconsistent rows.
    fn analyze_inconsistent(
        &self,
        txn: &Transaction,
        history: &[TransactionHistory],
        now: DateTime<Utc>,
    ) -> TransactionStatus {
        if txn.response.as_ref().is_some_and(is_non_empty) {
            return TransactionStatus::Completed;
        }

        if txn.error_details.as_ref().is_some_and(is_non_empty) {
            return TransactionStatus::Failed;
        }

        if txn.attempt_count >= self.config.max_retry_attempts {
            return TransactionStatus::Failed;
        }

        let age = now - txn.created_at;
        if age < chrono::Duration::minutes(1) {
            return TransactionStatus::Pending;
        }
        if age > chrono::Duration::minutes(30) {
            // Old enough that guessing is worse than flagging for an
            // operator.
            return TransactionStatus::Inconsistent;
        }

        // Fall back to the last non-inconsistent status we observed.
        for entry in history.iter().rev() {
            match entry.new_status_enum() {
                Some(TransactionStatus::Inconsistent) | None => continue,
                Some(TransactionStatus::Processing) => {
                    return if self.is_timed_out(txn, now) {
                        TransactionStatus::Timeout
                    } else {
                        TransactionStatus::Processing
                    };
                }
                Some(previous) => return previous,
            }
        }

        TransactionStatus::Inconsistent
    }
}

fn is_non_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(arr) => !arr.is_empty(),
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn manager() -> StateManager {
        StateManager::new(TransactionConfig::default())
    }

    fn txn(status: TransactionStatus, age_minutes: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            origin_system: "billing".into(),
            status: status.as_str().into(),
            payload: serde_json::json!({}),
            response: None,
            error_details: None,
            attempt_count: 1,
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

    fn history_entry(txn_id: Uuid, status: TransactionStatus, reason: &str) -> TransactionHistory {
        TransactionHistory {
            id: 1,
            transaction_id: txn_id,
            previous_status: None,
            new_status: status.as_str().into(),
            changed_at: Utc::now(),
            reason: reason.into(),
            changed_by: "SYSTEM".into(),
            context: None,
            attempt_number: 1,
            is_automatic: true,
        }
    }

    #[test]
    fn test_terminal_status_unchanged() {
        let tx = txn(TransactionStatus::Completed, 60);
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Completed
        );
    }

    #[test]
    fn test_stalled_pending_times_out() {
        let tx = txn(TransactionStatus::Pending, 10);
        assert!(manager().is_timed_out(&tx, Utc::now()));
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Timeout
        );
    }

    #[test]
    fn test_fresh_pending_stays_pending() {
        let tx = txn(TransactionStatus::Pending, 2);
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Pending
        );
    }

    #[test]
    fn test_processing_timeout_measured_from_last_attempt() {
        let mut tx = txn(TransactionStatus::Processing, 60);
        tx.last_attempt_at = Some(Utc::now() - Duration::minutes(3));
        assert!(!manager().is_timed_out(&tx, Utc::now()));

        tx.last_attempt_at = Some(Utc::now() - Duration::minutes(15));
        assert!(manager().is_timed_out(&tx, Utc::now()));
    }

    #[test]
    fn test_completion_evidence_from_history_status() {
        let mut tx = txn(TransactionStatus::Timeout, 3);
        tx.status = TransactionStatus::Timeout.as_str().into();
        let history = vec![history_entry(tx.id, TransactionStatus::Completed, "done")];
        assert_eq!(
            manager().determine_actual_status(&tx, &history, Utc::now()),
            TransactionStatus::Completed
        );
    }

    #[test]
    fn test_completion_evidence_from_reason_text() {
        let tx = txn(TransactionStatus::Timeout, 3);
        let history = vec![history_entry(
            tx.id,
            TransactionStatus::Processing,
            "downstream reported Completed",
        )];
        assert_eq!(
            manager().determine_actual_status(&tx, &history, Utc::now()),
            TransactionStatus::Completed
        );
    }

    #[test]
    fn test_failure_evidence_from_reason_text() {
        let tx = txn(TransactionStatus::Timeout, 3);
        let history = vec![history_entry(
            tx.id,
            TransactionStatus::Processing,
            "gateway error on settle",
        )];
        assert_eq!(
            manager().determine_actual_status(&tx, &history, Utc::now()),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn test_inconsistent_with_response_completes() {
        let mut tx = txn(TransactionStatus::Inconsistent, 5);
        tx.response = Some(serde_json::json!({"status": "ok"}));
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Completed
        );
    }

    #[test]
    fn test_inconsistent_with_errors_fails() {
        let mut tx = txn(TransactionStatus::Inconsistent, 5);
        tx.error_details = Some(serde_json::json!({"code": "E42"}));
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn test_inconsistent_exhausted_attempts_fails() {
        let mut tx = txn(TransactionStatus::Inconsistent, 5);
        tx.attempt_count = 3;
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Failed
        );
    }

    #[test]
    fn test_inconsistent_very_fresh_returns_pending() {
        let tx = txn(TransactionStatus::Inconsistent, 0);
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Pending
        );
    }

    #[test]
    fn test_inconsistent_very_old_stays_inconsistent() {
        let tx = txn(TransactionStatus::Inconsistent, 45);
        assert_eq!(
            manager().determine_actual_status(&tx, &[], Utc::now()),
            TransactionStatus::Inconsistent
        );
    }

    #[test]
    fn test_inconsistent_falls_back_to_last_clean_status() {
        let tx = txn(TransactionStatus::Inconsistent, 5);
        let history = vec![
            history_entry(tx.id, TransactionStatus::Pending, "received"),
            history_entry(tx.id, TransactionStatus::Inconsistent, "conflicting signals"),
        ];
        assert_eq!(
            manager().determine_actual_status(&tx, &history, Utc::now()),
            TransactionStatus::Pending
        );
    }

    #[test]
    fn test_retry_eligibility() {
        let m = manager();
        let now = Utc::now();

        assert!(!m.should_retry(&txn(TransactionStatus::Completed, 5), now));
        assert!(!m.should_retry(&txn(TransactionStatus::PermanentlyFailed, 5), now));
        assert!(m.should_retry(&txn(TransactionStatus::Pending, 1), now));
        assert!(!m.should_retry(&txn(TransactionStatus::Inconsistent, 5), now));

        // Timeout retries only while younger than 30 minutes.
        assert!(m.should_retry(&txn(TransactionStatus::Timeout, 10), now));
        assert!(!m.should_retry(&txn(TransactionStatus::Timeout, 40), now));

        // Processing retries only once it is considered stuck.
        assert!(!m.should_retry(&txn(TransactionStatus::Processing, 2), now));
        assert!(m.should_retry(&txn(TransactionStatus::Processing, 20), now));

        // Attempt ceiling wins over everything else.
        let mut exhausted = txn(TransactionStatus::Pending, 1);
        exhausted.attempt_count = 3;
        assert!(!m.should_retry(&exhausted, now));
    }
}
