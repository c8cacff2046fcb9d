//! Error types for monitoring.

use thiserror::Error;

use relay_transactions::TransactionError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("A monitoring pass is already in progress")]
    SweepInProgress,

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
