//! Partitioned at-least-once event transport.
//!
//! Producers key transaction events by transaction id and webhook
//! events by subscription id, preserving per-subject ordering on a
//! single partition. Consumers commit offsets only after processing;
//! the database-side `processed_events` guard and the delivery-row
//! insert make redelivery harmless.

pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod outbox;
pub mod producer;

pub use config::KafkaConfig;
pub use consumer::{run_consumer, MessageHandler};
pub use error::EventError;
pub use message::{TransactionEventMessage, WebhookEventMessage};
pub use outbox::OutboxRelay;
pub use producer::EventProducer;
