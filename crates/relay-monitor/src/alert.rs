//! Operator alerting.
//!
//! Dispatch is fire-and-forget: a spawned task hands the alert to the
//! configured channel and logs failures. Nothing here may block or fail
//! the caller. The channel trait is the seam where a deployment plugs
//! in its actual transport (email, chat, pager).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, warn};

use relay_db::models::Transaction;

/// Outbound alert transport.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String>;
}

/// Default channel: structured warn-level log lines. Keeps alerting
/// observable in deployments that have not wired a transport yet.
#[derive(Debug, Clone, Default)]
pub struct LogAlertChannel;

#[async_trait::async_trait]
impl AlertChannel for LogAlertChannel {
    async fn send(&self, subject: &str, body: &str) -> Result<(), String> {
        warn!(target: "alerts", subject = %subject, "{body}");
        Ok(())
    }
}

/// Asynchronous alert dispatcher.
#[derive(Clone)]
pub struct AlertDispatcher {
    channel: Arc<dyn AlertChannel>,
}

impl AlertDispatcher {
    #[must_use]
    pub fn new(channel: Arc<dyn AlertChannel>) -> Self {
        Self { channel }
    }

    /// Send a generic alert without blocking the caller.
    pub fn send_alert(&self, subject: &str, message: &str) {
        let channel = self.channel.clone();
        let subject = format!("ALERT: {subject}");
        let message = message.to_string();
        tokio::spawn(async move {
            if let Err(e) = channel.send(&subject, &message).await {
                error!(target: "alerts", subject = %subject, error = %e, "Alert dispatch failed");
            }
        });
    }

    /// Alert for one anomalous transaction, with its matched rules and
    /// a state summary.
    pub fn send_transaction_alert(
        &self,
        txn: &Transaction,
        anomalies: &BTreeMap<String, String>,
    ) {
        if anomalies.is_empty() {
            return;
        }

        let mut body = format!(
            "Transaction requiring attention: {}\n\nStatus: {}\nOrigin: {}\nAttempts: {}\nCreated: {}\nUpdated: {}\n\nDetected anomalies:\n",
            txn.id, txn.status, txn.origin_system, txn.attempt_count, txn.created_at, txn.updated_at
        );
        for (rule, detail) in anomalies {
            body.push_str(&format!("  - {rule}: {detail}\n"));
        }

        self.send_alert(&format!("Transaction anomaly {}", txn.id), &body);
    }

    /// Periodic health summary.
    pub fn send_system_health_alert(
        &self,
        metrics: &serde_json::Value,
        anomaly_stats: &serde_json::Value,
    ) {
        let body = format!(
            "System health summary\n\nMetrics: {metrics}\nAnomalies: {anomaly_stats}\n"
        );
        self.send_alert("System health", &body);
    }

    /// Unclassified failure in a scheduled task.
    pub fn send_critical_error_alert(&self, error_text: &str, details: &str) {
        let body = format!("Critical error: {error_text}\n\nDetails: {details}\n");
        self.send_alert("Critical error", &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingChannel {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait::async_trait]
    impl AlertChannel for RecordingChannel {
        async fn send(&self, subject: &str, body: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_alert_is_dispatched_with_prefixed_subject() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = AlertDispatcher::new(Arc::new(RecordingChannel { sent: sent.clone() }));

        dispatcher.send_alert("Monitor Error", "sweep failed");
        tokio::task::yield_now().await;
        // Give the spawned task a moment to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ALERT: Monitor Error");
        assert!(sent[0].1.contains("sweep failed"));
    }

    struct FailingChannel;

    #[async_trait::async_trait]
    impl AlertChannel for FailingChannel {
        async fn send(&self, _subject: &str, _body: &str) -> Result<(), String> {
            Err("smtp unreachable".to_string())
        }
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_propagate() {
        let dispatcher = AlertDispatcher::new(Arc::new(FailingChannel));
        // Must not panic or surface the error.
        dispatcher.send_alert("x", "y");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
