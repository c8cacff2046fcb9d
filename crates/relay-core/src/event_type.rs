//! Outbound event-type enumeration.
//!
//! Closed set: subscriptions store a subset of these names and the
//! delivery engine routes on exact matches. Wire representation is the
//! bare variant name (e.g. `TransactionCompleted`).

use serde::{Deserialize, Serialize};

use crate::status::TransactionStatus;

/// All event types a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    TransactionCreated,
    TransactionStatusChanged,
    TransactionCompleted,
    TransactionFailed,
    TransactionTimeout,
    TransactionRetry,
    TransactionManualResolution,
    TransactionReconciled,
    TransactionInconsistent,
    SystemAlert,
    SystemReconciliationStart,
    SystemReconciliationComplete,
    Test,
}

impl EventType {
    /// Returns all supported event types.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::TransactionCreated,
            Self::TransactionStatusChanged,
            Self::TransactionCompleted,
            Self::TransactionFailed,
            Self::TransactionTimeout,
            Self::TransactionRetry,
            Self::TransactionManualResolution,
            Self::TransactionReconciled,
            Self::TransactionInconsistent,
            Self::SystemAlert,
            Self::SystemReconciliationStart,
            Self::SystemReconciliationComplete,
            Self::Test,
        ]
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionCreated => "TransactionCreated",
            Self::TransactionStatusChanged => "TransactionStatusChanged",
            Self::TransactionCompleted => "TransactionCompleted",
            Self::TransactionFailed => "TransactionFailed",
            Self::TransactionTimeout => "TransactionTimeout",
            Self::TransactionRetry => "TransactionRetry",
            Self::TransactionManualResolution => "TransactionManualResolution",
            Self::TransactionReconciled => "TransactionReconciled",
            Self::TransactionInconsistent => "TransactionInconsistent",
            Self::SystemAlert => "SystemAlert",
            Self::SystemReconciliationStart => "SystemReconciliationStart",
            Self::SystemReconciliationComplete => "SystemReconciliationComplete",
            Self::Test => "Test",
        }
    }

    /// Parse a wire/database name. Returns None for unknown types.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// Returns a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::TransactionCreated => "A transaction was accepted and recorded",
            Self::TransactionStatusChanged => "A transaction changed status",
            Self::TransactionCompleted => "A transaction completed successfully",
            Self::TransactionFailed => "A transaction failed",
            Self::TransactionTimeout => "A transaction exceeded its dwell threshold",
            Self::TransactionRetry => "A transaction attempt was retried",
            Self::TransactionManualResolution => "An operator resolved a transaction manually",
            Self::TransactionReconciled => "A transaction was reconciled automatically",
            Self::TransactionInconsistent => "A transaction entered an ambiguous state",
            Self::SystemAlert => "An operational alert was raised",
            Self::SystemReconciliationStart => "A system-wide reconciliation pass started",
            Self::SystemReconciliationComplete => "A system-wide reconciliation pass finished",
            Self::Test => "A test event requested by an operator",
        }
    }

    /// The event emitted when a transaction lands on `status` through an
    /// ordinary automatic transition.
    #[must_use]
    pub fn for_status_change(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Completed => Self::TransactionCompleted,
            TransactionStatus::Failed | TransactionStatus::PermanentlyFailed => {
                Self::TransactionFailed
            }
            TransactionStatus::Timeout => Self::TransactionTimeout,
            TransactionStatus::Inconsistent => Self::TransactionInconsistent,
            TransactionStatus::Pending | TransactionStatus::Processing => {
                Self::TransactionStatusChanged
            }
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_returns_13() {
        assert_eq!(EventType::all().len(), 13);
    }

    #[test]
    fn test_as_str_roundtrip() {
        for et in EventType::all() {
            assert_eq!(EventType::parse(et.as_str()), Some(et), "roundtrip {et}");
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(EventType::parse("TransactionExploded"), None);
        assert_eq!(EventType::parse(""), None);
    }

    #[test]
    fn test_serialization_uses_variant_name() {
        let json = serde_json::to_string(&EventType::TransactionCompleted).unwrap();
        assert_eq!(json, "\"TransactionCompleted\"");
    }

    #[test]
    fn test_for_status_change() {
        assert_eq!(
            EventType::for_status_change(TransactionStatus::Completed),
            EventType::TransactionCompleted
        );
        assert_eq!(
            EventType::for_status_change(TransactionStatus::Timeout),
            EventType::TransactionTimeout
        );
        assert_eq!(
            EventType::for_status_change(TransactionStatus::Processing),
            EventType::TransactionStatusChanged
        );
    }
}
