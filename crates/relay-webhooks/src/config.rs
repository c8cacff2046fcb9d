//! Delivery engine configuration.

use std::time::Duration;

use crate::crypto::SignatureAlgorithm;

/// Tunables for the webhook delivery engine and its schedulers.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Default attempt ceiling; per-subscription `max_retries` wins.
    pub max_retry_attempts: i32,
    /// Base of the exponential backoff.
    pub base_delay_seconds: u32,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout.
    pub socket_timeout: Duration,
    /// Pool acquire timeout.
    pub acquire_timeout: Duration,
    /// Total pooled connections.
    pub max_total_connections: usize,
    /// Pooled connections per host.
    pub max_connections_per_route: usize,
    /// Idle connection eviction.
    pub idle_eviction: Duration,
    /// Keep-alive ceiling.
    pub keep_alive: Duration,
    /// Payload signature algorithm.
    pub signature_algorithm: SignatureAlgorithm,
    /// Dwell threshold before a PROCESSING delivery counts as hung.
    pub hang_timeout: chrono::Duration,
    /// Terminal deliveries older than this are archived.
    pub max_age: chrono::Duration,
    /// Deliveries fetched per retry-pump tick.
    pub retry_batch_size: i64,
    /// Concurrent deliveries per retry-pump tick.
    pub max_concurrent_retries: usize,
    /// AES-256 key for signing secrets at rest.
    pub encryption_key: Vec<u8>,
}

impl WebhookConfig {
    /// Production defaults with the given encryption key.
    #[must_use]
    pub fn new(encryption_key: Vec<u8>) -> Self {
        Self {
            max_retry_attempts: 5,
            base_delay_seconds: 60,
            connect_timeout: Duration::from_millis(5000),
            socket_timeout: Duration::from_millis(10_000),
            acquire_timeout: Duration::from_millis(2000),
            max_total_connections: 100,
            max_connections_per_route: 20,
            idle_eviction: Duration::from_secs(60),
            keep_alive: Duration::from_secs(30),
            signature_algorithm: SignatureAlgorithm::HmacSha256,
            hang_timeout: chrono::Duration::minutes(30),
            max_age: chrono::Duration::hours(24),
            retry_batch_size: 50,
            max_concurrent_retries: 20,
            encryption_key,
        }
    }
}
