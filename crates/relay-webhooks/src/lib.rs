//! Webhook subscription registry and delivery engine.
//!
//! Subscribers register HTTPS endpoints with an event-type filter and a
//! signing secret. Transaction state changes fan out into per-target
//! delivery rows which are POSTed with HMAC signatures, retried with
//! jittered exponential backoff and dead-lettered once the
//! per-subscription attempt ceiling is reached.

pub mod config;
pub mod consumers;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod schedulers;
pub mod subscription;
pub mod validation;

pub use config::WebhookConfig;
pub use consumers::{TransactionEventHandler, WebhookEventHandler};
pub use delivery::DeliveryService;
pub use error::WebhookError;
pub use router::{webhooks_router, WebhooksState};
pub use schedulers::WebhookSchedulers;
pub use subscription::SubscriptionService;
