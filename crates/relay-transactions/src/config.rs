//! Tunables for the transaction lifecycle.

use chrono::Duration;

/// Timeouts and retry limits for the transaction state machine.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Maximum dwell in `PENDING` before the row counts as timed out.
    pub pending_timeout: Duration,
    /// Maximum idle dwell in `PROCESSING` before the row counts as
    /// timed out, measured from the later of creation and last attempt.
    pub processing_timeout: Duration,
    /// Attempt ceiling for request-path and automatic retries.
    pub max_retry_attempts: i32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::minutes(5),
            processing_timeout: Duration::minutes(10),
            max_retry_attempts: 3,
        }
    }
}

impl TransactionConfig {
    #[must_use]
    pub fn new(pending_minutes: i64, processing_minutes: i64, max_retry_attempts: i32) -> Self {
        Self {
            pending_timeout: Duration::minutes(pending_minutes),
            processing_timeout: Duration::minutes(processing_minutes),
            max_retry_attempts,
        }
    }
}
