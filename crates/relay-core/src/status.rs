//! Transaction and webhook-delivery status machines.
//!
//! Both enums carry their legal automatic transition graph. Manual
//! operator overrides are allowed to bypass `can_transition_to` and are
//! audited separately in the history table.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Accepted, not yet picked up for processing.
    Pending,
    /// A worker is actively processing the transaction.
    Processing,
    /// Finished successfully; response payload is present.
    Completed,
    /// Finished unsuccessfully; error details are present.
    Failed,
    /// Exceeded its dwell threshold in Pending or Processing.
    Timeout,
    /// Outcome is ambiguous and needs reconciliation.
    Inconsistent,
    /// Failed and exhausted every recovery avenue.
    PermanentlyFailed,
}

impl TransactionStatus {
    /// Returns all statuses, in declaration order.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Timeout,
            Self::Inconsistent,
            Self::PermanentlyFailed,
        ]
    }

    /// No automatic transition leaves a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PermanentlyFailed)
    }

    /// Statuses a healthy transaction moves through.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Statuses that indicate the transaction needs reconciliation.
    #[must_use]
    pub fn is_problematic(&self) -> bool {
        matches!(self, Self::Timeout | Self::Inconsistent)
    }

    /// Whether an automatic transition from `self` to `target` is legal.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        use TransactionStatus::*;
        match self {
            Pending => matches!(target, Processing | Completed | Failed | Timeout | Inconsistent),
            Processing => matches!(target, Completed | Failed | Timeout | Inconsistent),
            Timeout => matches!(
                target,
                Pending | Completed | Failed | Inconsistent | PermanentlyFailed
            ),
            Inconsistent => matches!(target, Pending | Completed | Failed | PermanentlyFailed),
            Completed | Failed | PermanentlyFailed => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Inconsistent => "INCONSISTENT",
            Self::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }

    /// Parse the database/wire representation. Returns None for unknown input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "TIMEOUT" => Some(Self::Timeout),
            "INCONSISTENT" => Some(Self::Inconsistent),
            "PERMANENTLY_FAILED" => Some(Self::PermanentlyFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Status of a webhook delivery attempt-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Created, waiting for a worker.
    Pending,
    /// An HTTP attempt is in flight.
    Processing,
    /// Subscriber answered 2xx.
    Delivered,
    /// Last attempt failed; failure policy not yet applied.
    Failed,
    /// Failure policy scheduled another attempt at `next_retry_at`.
    RetryScheduled,
    /// Retries exhausted.
    PermanentlyFailed,
    /// Abandoned by operator action or subscription removal.
    Canceled,
}

impl DeliveryStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::PermanentlyFailed | Self::Canceled)
    }

    /// Whether a transition from `self` to `target` is legal.
    ///
    /// `Canceled` is reachable from any non-terminal status because it
    /// records an operator abandoning the stream.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        use DeliveryStatus::*;
        if target == Canceled {
            return !self.is_terminal();
        }
        match self {
            Pending => matches!(target, Processing),
            Processing => matches!(target, Delivered | Failed),
            Failed => matches!(target, RetryScheduled | PermanentlyFailed),
            RetryScheduled => matches!(target, Processing),
            Delivered | PermanentlyFailed | Canceled => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
            Self::RetryScheduled => "RETRY_SCHEDULED",
            Self::PermanentlyFailed => "PERMANENTLY_FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "DELIVERED" => Some(Self::Delivered),
            "FAILED" => Some(Self::Failed),
            "RETRY_SCHEDULED" => Some(Self::RetryScheduled),
            "PERMANENTLY_FAILED" => Some(Self::PermanentlyFailed),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_are_absorbing() {
        for terminal in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::PermanentlyFailed,
        ] {
            for target in TransactionStatus::all() {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} must not transition to {target}"
                );
            }
        }
    }

    #[test]
    fn test_pending_transitions() {
        let p = TransactionStatus::Pending;
        assert!(p.can_transition_to(TransactionStatus::Processing));
        assert!(p.can_transition_to(TransactionStatus::Completed));
        assert!(p.can_transition_to(TransactionStatus::Failed));
        assert!(p.can_transition_to(TransactionStatus::Timeout));
        assert!(p.can_transition_to(TransactionStatus::Inconsistent));
        assert!(!p.can_transition_to(TransactionStatus::PermanentlyFailed));
        assert!(!p.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn test_problematic_statuses_can_recover_to_pending() {
        assert!(TransactionStatus::Timeout.can_transition_to(TransactionStatus::Pending));
        assert!(TransactionStatus::Inconsistent.can_transition_to(TransactionStatus::Pending));
        assert!(!TransactionStatus::Processing.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn test_timeout_cannot_reenter_processing() {
        assert!(!TransactionStatus::Timeout.can_transition_to(TransactionStatus::Processing));
    }

    #[test]
    fn test_status_classification() {
        assert!(TransactionStatus::Pending.is_transient());
        assert!(TransactionStatus::Processing.is_transient());
        assert!(TransactionStatus::Timeout.is_problematic());
        assert!(TransactionStatus::Inconsistent.is_problematic());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(!TransactionStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_transaction_status_roundtrip() {
        for status in TransactionStatus::all() {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_delivery_happy_path() {
        use DeliveryStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Delivered));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RetryScheduled));
        assert!(Failed.can_transition_to(PermanentlyFailed));
        assert!(RetryScheduled.can_transition_to(Processing));
    }

    #[test]
    fn test_delivery_terminal_statuses() {
        use DeliveryStatus::*;
        for terminal in [Delivered, PermanentlyFailed, Canceled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Processing));
            assert!(!terminal.can_transition_to(Canceled));
        }
    }

    #[test]
    fn test_delivery_cancel_from_any_live_status() {
        use DeliveryStatus::*;
        for live in [Pending, Processing, Failed, RetryScheduled] {
            assert!(live.can_transition_to(Canceled), "{live} should cancel");
        }
    }

    #[test]
    fn test_delivery_status_roundtrip() {
        use DeliveryStatus::*;
        for status in [
            Pending,
            Processing,
            Delivered,
            Failed,
            RetryScheduled,
            PermanentlyFailed,
            Canceled,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeliveryStatus::parse("delivered"), None);
    }
}
