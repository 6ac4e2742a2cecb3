//! Per-source timers with coordinated start, stop and refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use feedrelay_common::types::SourceConfig;

use crate::poller::SourcePoller;

/// Lifecycle of one source task: `Idle → Armed → Firing → Armed → … → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Armed,
    Firing,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub url: String,
    pub state: SourceState,
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
struct StateBoard(Arc<RwLock<Vec<SourceStatus>>>);

impl StateBoard {
    fn reset(&self, sources: &[SourceConfig]) {
        *self.0.write() = sources
            .iter()
            .map(|s| SourceStatus {
                url: s.url.clone(),
                state: SourceState::Idle,
                last_poll: None,
            })
            .collect();
    }

    fn set(&self, slot: usize, state: SourceState) {
        if let Some(status) = self.0.write().get_mut(slot) {
            status.state = state;
        }
    }

    fn polled(&self, slot: usize) {
        if let Some(status) = self.0.write().get_mut(slot) {
            status.state = SourceState::Armed;
            status.last_poll = Some(Utc::now());
        }
    }

    fn snapshot(&self) -> Vec<SourceStatus> {
        self.0.read().clone()
    }
}

/// The newest epoch's token, reachable without the registry lock so a stop
/// can interrupt a start that is still running its initial polls.
///
/// `generation` moves on every cancel; a start that finds it changed after
/// tearing down the previous epoch was superseded and must not arm anything.
struct Epoch {
    cancel: CancellationToken,
    generation: u64,
    closed: bool,
}

#[derive(Default)]
struct Registry {
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns one recurring task per configured source.
///
/// Every epoch shares one cancellation token. `start`, `refresh` and `stop`
/// cancel the running epoch and await all of its tasks before anything new
/// is armed, so no task from an older configuration outlives the call.
pub struct FeedScheduler {
    poller: Arc<SourcePoller>,
    registry: tokio::sync::Mutex<Registry>,
    epoch: Mutex<Epoch>,
    states: StateBoard,
}

impl FeedScheduler {
    pub fn new(poller: Arc<SourcePoller>) -> Self {
        Self {
            poller,
            registry: tokio::sync::Mutex::new(Registry::default()),
            epoch: Mutex::new(Epoch {
                cancel: CancellationToken::new(),
                generation: 0,
                closed: false,
            }),
            states: StateBoard::default(),
        }
    }

    /// Replace whatever is running with `sources`.
    ///
    /// Runs one poll per source in order before arming the timers. Poll
    /// errors are logged and do not prevent the source from being armed.
    /// Does nothing once [`shutdown`](Self::shutdown) has been called.
    pub async fn start(&self, sources: Vec<SourceConfig>) {
        let Some(generation) = self.cancel_epoch(false) else {
            return;
        };
        let mut registry = self.registry.lock().await;
        teardown(&mut registry).await;

        let cancel = CancellationToken::new();
        {
            let mut epoch = self.epoch.lock();
            if epoch.closed || epoch.generation != generation {
                tracing::debug!("Scheduler start superseded before arming");
                return;
            }
            epoch.cancel = cancel.clone();
        }
        registry.cancel = Some(cancel.clone());
        self.states.reset(&sources);

        for (slot, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            self.states.set(slot, SourceState::Firing);
            if let Err(e) = self.poller.poll(source, &cancel).await {
                tracing::warn!(source_url = %source.url, error = %e, "Initial poll failed");
            }
            self.states.polled(slot);
        }

        if cancel.is_cancelled() {
            for slot in 0..sources.len() {
                self.states.set(slot, SourceState::Cancelled);
            }
            tracing::info!("Scheduler start cancelled before arming");
            return;
        }

        let count = sources.len();
        for (slot, source) in sources.into_iter().enumerate() {
            self.states.set(slot, SourceState::Armed);
            registry.tasks.push(tokio::spawn(run_source(
                self.poller.clone(),
                source,
                slot,
                self.states.clone(),
                cancel.clone(),
            )));
        }

        tracing::info!(sources = count, "Scheduler started");
    }

    /// Cancel every source task and wait for all of them to exit.
    pub async fn stop(&self) {
        self.cancel_epoch(false);
        self.drain().await;
    }

    /// Stop for good: like [`stop`](Self::stop), and any later or
    /// concurrent `start`/`refresh` is refused.
    pub async fn shutdown(&self) {
        self.cancel_epoch(true);
        self.drain().await;
    }

    /// Cancel the current epoch and return the new generation, or `None`
    /// if the scheduler is closed.
    fn cancel_epoch(&self, close: bool) -> Option<u64> {
        let mut epoch = self.epoch.lock();
        epoch.cancel.cancel();
        epoch.generation += 1;
        if close {
            epoch.closed = true;
        }
        (!epoch.closed).then_some(epoch.generation)
    }

    async fn drain(&self) {
        let mut registry = self.registry.lock().await;
        let count = registry.tasks.len();
        teardown(&mut registry).await;
        tracing::info!(sources = count, "Scheduler stopped");
    }

    /// Stop, then start with the new configuration.
    pub async fn refresh(&self, sources: Vec<SourceConfig>) {
        tracing::info!(sources = sources.len(), "Refreshing scheduler configuration");
        self.start(sources).await;
    }

    pub fn snapshot(&self) -> Vec<SourceStatus> {
        self.states.snapshot()
    }

    /// Number of source tasks that have not exited.
    pub async fn running_tasks(&self) -> usize {
        self.registry
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

async fn teardown(registry: &mut Registry) {
    if let Some(cancel) = registry.cancel.take() {
        cancel.cancel();
    }
    for task in registry.tasks.drain(..) {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Source task ended abnormally");
        }
    }
}

async fn run_source(
    poller: Arc<SourcePoller>,
    source: SourceConfig,
    slot: usize,
    states: StateBoard,
    cancel: CancellationToken,
) {
    let period = source.poll_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        source_url = %source.url,
        interval_secs = period.as_secs(),
        "Source timer armed"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        states.set(slot, SourceState::Firing);
        if let Err(e) = poller.poll(&source, &cancel).await {
            tracing::warn!(source_url = %source.url, error = %e, "Poll failed");
        }
        states.polled(slot);
    }

    states.set(slot, SourceState::Cancelled);
    tracing::debug!(source_url = %source.url, "Source task exited");
}
