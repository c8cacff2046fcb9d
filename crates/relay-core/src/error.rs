//! Wire error shape shared by every public entry point.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Structured error object returned by terminal handlers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Build an error body stamped with the current time.
    #[must_use]
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            error: error.into(),
            message: message.into(),
            path: path.into(),
            details: None,
        }
    }

    /// Attach a structured details object.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_omitted_when_absent() {
        let body = ErrorBody::new(404, "not_found", "Transaction not found", "/api/transactions/x");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], 404);
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_details_serialized_when_present() {
        let body = ErrorBody::new(409, "duplicate_transaction", "conflict", "/api/transactions")
            .with_details(serde_json::json!({"existingStatus": "PENDING"}));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["details"]["existingStatus"], "PENDING");
    }
}
