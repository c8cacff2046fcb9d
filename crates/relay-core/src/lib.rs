//! Shared domain types for the relay transaction recovery service.
//!
//! Holds the vocabulary every other crate speaks: transaction and
//! delivery status machines, the outbound event-type enumeration,
//! actor tags for audit entries, the wire error shape, and small
//! id/token helpers.

pub mod actors;
pub mod error;
pub mod event_type;
pub mod ids;
pub mod status;

pub use error::ErrorBody;
pub use event_type::EventType;
pub use status::{DeliveryStatus, TransactionStatus};
