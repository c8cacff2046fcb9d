//! Error types for transaction operations.

use thiserror::Error;
use uuid::Uuid;

use relay_core::TransactionStatus;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    #[error("Duplicate transaction {id} in status {status}")]
    Duplicate { id: Uuid, status: TransactionStatus },

    #[error("Illegal transition from {from} to {to} for transaction {id}")]
    IllegalTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Corrupt status column for transaction {id}: {raw}")]
    CorruptStatus { id: Uuid, raw: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A monitoring pass is already in progress")]
    SweepInProgress,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
