//! One poll cycle for one source.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use feedrelay_common::types::{NewLedgerEntry, SourceConfig};
use feedrelay_engine::formatter::Formatter;
use feedrelay_engine::ledger::Ledger;
use feedrelay_feeds::{FeedFetcher, FetchError};
use feedrelay_notifier::{RateLimitedSender, SendError};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
}

/// What one successful cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub fetched: usize,
    pub already_delivered: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fetches a source, delivers what the ledger has not seen, and records each
/// confirmed delivery.
pub struct SourcePoller {
    fetcher: Arc<dyn FeedFetcher>,
    formatter: Arc<dyn Formatter>,
    ledger: Arc<dyn Ledger>,
    sender: Arc<RateLimitedSender>,
}

impl SourcePoller {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        formatter: Arc<dyn Formatter>,
        ledger: Arc<dyn Ledger>,
        sender: Arc<RateLimitedSender>,
    ) -> Self {
        Self {
            fetcher,
            formatter,
            ledger,
            sender,
        }
    }

    /// Run one cycle.
    ///
    /// Items are delivered oldest first (the reverse of feed order). An item
    /// is recorded only after the sender confirms delivery, so anything that
    /// fails here is offered again next cycle. Delivery and recording are
    /// not atomic: a crash between the two re-sends that item once.
    pub async fn poll(
        &self,
        source: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let url = source.url.as_str();
        let feed = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| PollError::Fetch {
                url: url.to_string(),
                source: e,
            })?;

        let mut report = PollReport {
            fetched: feed.items.len(),
            ..Default::default()
        };
        let destination = source.destination();

        for item in feed.items.iter().rev() {
            if cancel.is_cancelled() {
                break;
            }

            match self.ledger.has(&item.guid, url).await {
                Ok(true) => {
                    report.already_delivered += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        source_url = url,
                        guid = %item.guid,
                        error = %e,
                        "Ledger lookup failed, skipping item"
                    );
                    report.failed += 1;
                    continue;
                }
            }

            let text = self.formatter.render(item, &feed.metadata, source.template());
            match self
                .sender
                .send(&source.bot_token, &destination, &text, cancel)
                .await
            {
                Ok(()) => {
                    report.delivered += 1;
                    let entry = NewLedgerEntry::from_item(item, url, Utc::now());
                    if let Err(e) = self.ledger.record(&entry).await {
                        tracing::error!(
                            source_url = url,
                            guid = %item.guid,
                            error = %e,
                            "Delivered item could not be recorded"
                        );
                    }
                }
                Err(SendError::Cancelled) => break,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        source_url = url,
                        guid = %item.guid,
                        error = %e,
                        "Delivery failed, item stays pending"
                    );
                }
            }
        }

        tracing::info!(
            source_url = url,
            fetched = report.fetched,
            already_delivered = report.already_delivered,
            delivered = report.delivered,
            failed = report.failed,
            "Poll cycle finished"
        );
        Ok(report)
    }
}
