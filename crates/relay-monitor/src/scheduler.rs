//! Monitor scheduler: runs the sweep on a fixed interval, skipping a
//! tick entirely when the previous pass is still running.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::MonitorError;
use crate::monitor::MonitorService;

pub struct MonitorScheduler {
    service: Arc<MonitorService>,
    interval: Duration,
}

impl MonitorScheduler {
    #[must_use]
    pub fn new(service: Arc<MonitorService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub async fn run(self, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Transaction monitor started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Transaction monitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.service.run_sweep().await {
                        Ok(report) => {
                            info!(
                                pending_resolved = report.pending_resolved,
                                auto_retried = report.auto_retried,
                                "Monitor tick complete"
                            );
                        }
                        Err(MonitorError::SweepInProgress) => {
                            info!("Skipping monitor tick; previous pass still running");
                        }
                        Err(e) => {
                            error!(error = %e, "Monitor tick failed");
                        }
                    }
                }
            }
        }
    }
}
