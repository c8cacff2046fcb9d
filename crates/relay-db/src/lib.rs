//! Persistence layer for the relay service.
//!
//! One model per table, each carrying the query set its services need.
//! Queries are plain `sqlx::query_as` with positional binds; statuses
//! are stored as text and parsed at the service boundary. All write
//! methods accept any `PgExecutor` so services can run them inside a
//! single database transaction where atomicity matters.

pub mod migrations;
pub mod models;
pub mod pool;

pub use pool::connect_pool;
