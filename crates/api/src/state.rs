//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use feedrelay_common::config::{AppConfig, ConfigStore};
use feedrelay_common::error::AppError;
use feedrelay_engine::formatter::Formatter;
use feedrelay_feeds::FeedFetcher;
use feedrelay_notifier::RateLimitedSender;
use feedrelay_scheduler::FeedScheduler;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ConfigStore>,
    pub scheduler: Arc<FeedScheduler>,
    pub fetcher: Arc<dyn FeedFetcher>,
    pub formatter: Arc<dyn Formatter>,
    pub sender: Arc<RateLimitedSender>,
    /// Fires on process shutdown; interrupts admin-triggered sends.
    pub shutdown: CancellationToken,
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<ConfigStore>,
        scheduler: Arc<FeedScheduler>,
        fetcher: Arc<dyn FeedFetcher>,
        formatter: Arc<dyn Formatter>,
        sender: Arc<RateLimitedSender>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
            fetcher,
            formatter,
            sender,
            shutdown,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Re-read the feeds file and restart the scheduler on the new sources.
    ///
    /// A file that fails to load or validate leaves the running
    /// configuration untouched. Reloads run one at a time, so the scheduler
    /// always ends on the snapshot the store holds.
    pub async fn reload_sources(&self) -> Result<usize, AppError> {
        let _guard = self.reload_lock.lock().await;
        let config = self.store.reload()?;
        self.scheduler.refresh(config.feeds.clone()).await;
        Ok(config.feeds.len())
    }
}
