//! Environment-driven application configuration.

use std::env;
use std::time::Duration;

use relay_transactions::TransactionConfig;
use relay_webhooks::crypto::SignatureAlgorithm;
use relay_webhooks::schedulers::SchedulerIntervals;
use relay_webhooks::WebhookConfig;

/// Everything the binary needs that is not Kafka-specific
/// (`KafkaConfig::from_env` covers the bus).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: String,
    pub transactions: TransactionConfig,
    pub monitor_interval: Duration,
    pub max_auto_retries: i32,
    pub anomaly_pending_minutes: i64,
    pub anomaly_processing_minutes: i64,
    pub anomaly_retry_threshold: i32,
    pub anomaly_state_change_threshold: i64,
    pub idempotency_critical_fields: Vec<String>,
    pub idempotency_ignored_fields: Vec<String>,
    pub idempotency_similarity_threshold: u32,
    pub webhooks: WebhookConfig,
    pub scheduler_intervals: SchedulerIntervals,
    pub outbox_poll: Duration,
}

impl AppConfig {
    /// Load from the environment, falling back to the documented
    /// defaults. Fails on a missing `DATABASE_URL` or a malformed
    /// `WEBHOOK_ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL is required".to_string())?;

        let encryption_key = env::var("WEBHOOK_ENCRYPTION_KEY")
            .map_err(|_| "WEBHOOK_ENCRYPTION_KEY is required".to_string())
            .and_then(|hex_key| {
                hex::decode(hex_key.trim())
                    .map_err(|e| format!("WEBHOOK_ENCRYPTION_KEY is not valid hex: {e}"))
            })?;
        if encryption_key.len() != 32 {
            return Err(format!(
                "WEBHOOK_ENCRYPTION_KEY must be 32 bytes (64 hex chars), got {}",
                encryption_key.len()
            ));
        }

        let mut webhooks = WebhookConfig::new(encryption_key);
        webhooks.max_retry_attempts = int_var("WEBHOOK_RETRY_MAX_ATTEMPTS", 5);
        webhooks.base_delay_seconds = int_var("WEBHOOK_RETRY_BASE_DELAY_SECONDS", 60);
        webhooks.connect_timeout =
            Duration::from_millis(int_var("WEBHOOK_CONNECTION_TIMEOUT_MS", 5000));
        webhooks.socket_timeout = Duration::from_millis(int_var("WEBHOOK_SOCKET_TIMEOUT_MS", 10_000));
        webhooks.max_total_connections = int_var("WEBHOOK_MAX_TOTAL_CONNECTIONS", 100);
        webhooks.max_connections_per_route = int_var("WEBHOOK_MAX_CONNECTIONS_PER_ROUTE", 20);
        webhooks.hang_timeout =
            chrono::Duration::minutes(int_var("WEBHOOK_HANG_TIMEOUT_MINUTES", 30));
        webhooks.max_age = chrono::Duration::hours(int_var("WEBHOOK_MAX_AGE_HOURS", 24));
        if let Ok(raw) = env::var("WEBHOOK_SIGNATURE_ALGORITHM") {
            webhooks.signature_algorithm = SignatureAlgorithm::parse(&raw)
                .ok_or_else(|| format!("Unknown WEBHOOK_SIGNATURE_ALGORITHM: {raw}"))?;
        }

        Ok(Self {
            database_url,
            database_max_connections: int_var("DATABASE_MAX_CONNECTIONS", 10),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            transactions: TransactionConfig::new(
                int_var("TRANSACTION_TIMEOUT_PENDING_MINUTES", 5),
                int_var("TRANSACTION_TIMEOUT_PROCESSING_MINUTES", 10),
                int_var("TRANSACTION_RETRY_MAX_ATTEMPTS", 3),
            ),
            monitor_interval: Duration::from_millis(int_var("TRANSACTION_MONITOR_INTERVAL_MS", 60_000)),
            max_auto_retries: int_var("TRANSACTION_MONITOR_MAX_AUTO_RETRIES", 3),
            anomaly_pending_minutes: int_var("ANOMALY_PENDING_THRESHOLD_MINUTES", 30),
            anomaly_processing_minutes: int_var("ANOMALY_PROCESSING_THRESHOLD_MINUTES", 60),
            anomaly_retry_threshold: int_var("ANOMALY_RETRY_THRESHOLD", 5),
            anomaly_state_change_threshold: int_var("ANOMALY_STATE_CHANGE_THRESHOLD", 10),
            idempotency_critical_fields: list_var(
                "IDEMPOTENCY_CRITICAL_FIELDS",
                &["amount", "accountNumber", "description", "reference"],
            ),
            idempotency_ignored_fields: list_var(
                "IDEMPOTENCY_IGNORED_FIELDS",
                &["timestamp", "clientIp", "deviceId"],
            ),
            idempotency_similarity_threshold: int_var("IDEMPOTENCY_SIMILARITY_THRESHOLD", 80),
            webhooks,
            scheduler_intervals: SchedulerIntervals {
                retry_pump: Duration::from_secs(int_var("SCHEDULER_WEBHOOK_RETRY_SECONDS", 60)),
                hang_sweep: Duration::from_secs(int_var("SCHEDULER_WEBHOOK_HANG_SECONDS", 600)),
                cleanup: Duration::from_secs(int_var("SCHEDULER_WEBHOOK_CLEANUP_SECONDS", 86_400)),
                failure_report: Duration::from_secs(int_var(
                    "SCHEDULER_WEBHOOK_REPORT_SECONDS",
                    604_800,
                )),
            },
            outbox_poll: Duration::from_millis(int_var("OUTBOX_POLL_MS", 500)),
        })
    }
}

fn int_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}
