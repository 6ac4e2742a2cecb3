//! Periodic ledger retention purge.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use feedrelay_common::config::FeedsConfig;
use feedrelay_engine::ledger::Ledger;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    pub source_url: String,
    pub removed: u64,
}

/// Purges each source's ledger entries older than its retention window.
/// Reads the configuration at every sweep, so reloads are picked up.
pub struct RetentionSweeper {
    ledger: Arc<dyn Ledger>,
    config: watch::Receiver<Arc<FeedsConfig>>,
    period: Duration,
}

impl RetentionSweeper {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        config: watch::Receiver<Arc<FeedsConfig>>,
        period: Duration,
    ) -> Self {
        Self {
            ledger,
            config,
            period,
        }
    }

    /// Purge every source with a non-zero retention. A failing source is
    /// logged and left out of the result; the others are still swept.
    pub async fn sweep_once(&self) -> Vec<SweepOutcome> {
        let config = self.config.borrow().clone();
        let mut outcomes = Vec::new();

        for source in config.feeds.iter().filter(|s| s.retention_days > 0) {
            match self.ledger.purge(&source.url, source.retention_days).await {
                Ok(removed) => {
                    if removed > 0 {
                        tracing::info!(
                            source_url = %source.url,
                            retention_days = source.retention_days,
                            removed,
                            "Purged expired ledger entries"
                        );
                    }
                    outcomes.push(SweepOutcome {
                        source_url: source.url.clone(),
                        removed,
                    });
                }
                Err(e) => {
                    tracing::error!(source_url = %source.url, error = %e, "Retention purge failed");
                }
            }
        }
        outcomes
    }

    /// Sweep now, then every `period`, until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            tracing::info!(interval_secs = self.period.as_secs(), "Retention sweeper started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            tracing::info!("Retention sweeper stopped");
        })
    }
}
