//! Database models, one module per table.

pub mod outbox_event;
pub mod processed_event;
pub mod transaction;
pub mod transaction_history;
pub mod webhook_delivery;
pub mod webhook_subscription;

pub use outbox_event::OutboxEvent;
pub use processed_event::ProcessedEvent;
pub use transaction::{CreateTransaction, StatusCount, Transaction};
pub use transaction_history::{NewHistoryEntry, TransactionHistory, TransitionCount};
pub use webhook_delivery::{CreateWebhookDelivery, WebhookDelivery};
pub use webhook_subscription::{CreateWebhookSubscription, UpdateWebhookSubscription, WebhookSubscription};
