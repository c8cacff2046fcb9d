//! Periodic webhook maintenance tasks.
//!
//! Four loops: the retry pump (due retries), the hang sweep (stuck
//! PROCESSING rows), the daily cleanup (archival of old terminal rows)
//! and the weekly failure report. Each loop holds an atomic guard so a
//! slow pass skips the next tick instead of stacking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use relay_db::models::WebhookSubscription;
use relay_monitor::AlertDispatcher;

use crate::delivery::DeliveryService;

/// Failure count at which a subscription enters the weekly report.
const REPORT_FAILURE_FLOOR: i64 = 10;

/// Intervals for the four maintenance loops.
#[derive(Debug, Clone)]
pub struct SchedulerIntervals {
    pub retry_pump: Duration,
    pub hang_sweep: Duration,
    pub cleanup: Duration,
    pub failure_report: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            retry_pump: Duration::from_secs(60),
            hang_sweep: Duration::from_secs(600),
            cleanup: Duration::from_secs(24 * 3600),
            failure_report: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Spawns and coordinates the maintenance loops.
pub struct WebhookSchedulers {
    delivery: DeliveryService,
    alerts: AlertDispatcher,
    intervals: SchedulerIntervals,
    retry_running: Arc<AtomicBool>,
    sweep_running: Arc<AtomicBool>,
}

impl WebhookSchedulers {
    #[must_use]
    pub fn new(
        delivery: DeliveryService,
        alerts: AlertDispatcher,
        intervals: SchedulerIntervals,
    ) -> Self {
        Self {
            delivery,
            alerts,
            intervals,
            retry_running: Arc::new(AtomicBool::new(false)),
            sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn all four loops; they stop when the token cancels.
    pub fn spawn(self, token: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(4);

        {
            let delivery = self.delivery.clone();
            let alerts = self.alerts.clone();
            let guard = self.retry_running.clone();
            let interval = self.intervals.retry_pump;
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                run_loop(interval, token, move || {
                    let delivery = delivery.clone();
                    let alerts = alerts.clone();
                    let guard = guard.clone();
                    async move {
                        if guard
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            debug!("Skipping retry pump tick; previous run still in progress");
                            return;
                        }
                        match delivery.process_due_retries().await {
                            Ok(0) => debug!("No webhook retries were due"),
                            Ok(n) => info!(processed = n, "Processed webhook retries"),
                            Err(e) => {
                                error!(error = %e, "Webhook retry processing failed");
                                alerts.send_alert(
                                    "Webhook Retry Error",
                                    &format!("Error during scheduled webhook retry processing: {e}"),
                                );
                            }
                        }
                        guard.store(false, Ordering::SeqCst);
                    }
                })
                .await;
            }));
        }

        {
            let delivery = self.delivery.clone();
            let alerts = self.alerts.clone();
            let guard = self.sweep_running.clone();
            let interval = self.intervals.hang_sweep;
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                run_loop(interval, token, move || {
                    let delivery = delivery.clone();
                    let alerts = alerts.clone();
                    let guard = guard.clone();
                    async move {
                        if guard
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            debug!("Skipping hang sweep tick; previous run still in progress");
                            return;
                        }
                        match delivery.sweep_hanging().await {
                            Ok(0) => debug!("No hanging webhook deliveries"),
                            Ok(n) => info!(rescheduled = n, "Rescheduled hanging deliveries"),
                            Err(e) => {
                                error!(error = %e, "Hang sweep failed");
                                alerts.send_alert(
                                    "Webhook Monitoring Error",
                                    &format!("Error checking for hanging webhook deliveries: {e}"),
                                );
                            }
                        }
                        guard.store(false, Ordering::SeqCst);
                    }
                })
                .await;
            }));
        }

        {
            let delivery = self.delivery.clone();
            let alerts = self.alerts.clone();
            let interval = self.intervals.cleanup;
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                run_loop(interval, token, move || {
                    let delivery = delivery.clone();
                    let alerts = alerts.clone();
                    async move {
                        match delivery.archive_old_deliveries().await {
                            Ok(0) => debug!("No old webhook deliveries to archive"),
                            Ok(n) => info!(archived = n, "Webhook delivery cleanup complete"),
                            Err(e) => {
                                error!(error = %e, "Webhook delivery cleanup failed");
                                alerts.send_alert(
                                    "Webhook Cleanup Error",
                                    &format!("Error during webhook delivery cleanup: {e}"),
                                );
                            }
                        }
                    }
                })
                .await;
            }));
        }

        {
            let delivery = self.delivery.clone();
            let alerts = self.alerts;
            let interval = self.intervals.failure_report;
            handles.push(tokio::spawn(async move {
                run_loop(interval, token, move || {
                    let delivery = delivery.clone();
                    let alerts = alerts.clone();
                    async move {
                        if let Err(e) = send_failure_report(&delivery, &alerts).await {
                            error!(error = %e, "Webhook failure report failed");
                            alerts.send_alert(
                                "Webhook Report Error",
                                &format!("Error generating webhook failure report: {e}"),
                            );
                        }
                    }
                })
                .await;
            }));
        }

        handles
    }
}

/// Weekly report: subscriptions with high lifetime failure counts plus
/// the aggregate delivery statistics.
async fn send_failure_report(
    delivery: &DeliveryService,
    alerts: &AlertDispatcher,
) -> Result<(), crate::error::WebhookError> {
    let failing =
        WebhookSubscription::find_failing(delivery.pool(), REPORT_FAILURE_FLOOR, 20).await?;
    let stats = delivery.statistics().await?;

    if failing.is_empty() {
        info!("Webhook failure report: no subscriptions above the failure floor");
        return Ok(());
    }

    let lines: Vec<serde_json::Value> = failing
        .iter()
        .map(|s| {
            json!({
                "subscription_id": s.id,
                "callback_url": s.callback_url,
                "failure_count": s.failure_count,
                "success_count": s.success_count,
                "last_failure_at": s.last_failure_at,
            })
        })
        .collect();

    alerts.send_alert(
        "Weekly webhook failure report",
        &format!(
            "Subscriptions with elevated failures:\n{}\n\nDelivery statistics: {stats}",
            serde_json::to_string_pretty(&lines).unwrap_or_default()
        ),
    );
    Ok(())
}

async fn run_loop<F, Fut>(interval: Duration, token: CancellationToken, tick: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so tasks start one full
    // interval after boot.
    timer.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = timer.tick() => tick().await,
        }
    }
}
