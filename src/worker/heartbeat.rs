use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ledger::LedgerClient;
use crate::stats::AgentStats;

/// Periodically proves liveness to the ledger, independent of job processing.
pub struct HeartbeatSupervisor {
    interval: Duration,
    ledger: Arc<dyn LedgerClient>,
    stats: Arc<AgentStats>,
}

impl HeartbeatSupervisor {
    pub fn new(interval: Duration, ledger: Arc<dyn LedgerClient>, stats: Arc<AgentStats>) -> Self {
        Self {
            interval,
            ledger,
            stats,
        }
    }

    /// Run until `shutdown` fires. The first heartbeat goes out one full
    /// interval after start; a failed heartbeat is logged and the loop continues.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Heartbeat supervisor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                result = self.ledger.heartbeat() => match result {
                    Ok(()) => {
                        self.stats.heartbeat_succeeded(Utc::now().timestamp_millis());
                        tracing::info!("Heartbeat confirmed");
                    }
                    Err(e) => {
                        self.stats.heartbeat_failed();
                        tracing::warn!(error = %e, "Heartbeat failed");
                    }
                },
                _ = shutdown.cancelled() => {
                    tracing::info!("Abandoning in-flight heartbeat");
                    break;
                }
            }
        }

        tracing::info!("Heartbeat supervisor stopped");
    }
}
