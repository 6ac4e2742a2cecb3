use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimum spacing between outbound attempts.
pub const MIN_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Shared "last attempt" timestamp behind one lock.
///
/// Every clone shares the same state, so a single `Pacer` handed to every
/// sender paces all sources and credentials together. Independent instances
/// do not interact.
#[derive(Clone)]
pub struct Pacer {
    min_interval: Duration,
    last_attempt: Arc<Mutex<Option<Instant>>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_attempt: Arc::new(Mutex::new(None)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `min_interval` has passed since the previous attempt by any
    /// caller, then claim the slot.
    ///
    /// The lock is held across the wait so callers are admitted one at a
    /// time. Returns `false` without claiming the slot if `cancel` fires.
    pub async fn wait_turn(&self, cancel: &CancellationToken) -> bool {
        let mut last = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            guard = self.last_attempt.lock() => guard,
        };

        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        *last = Some(Instant::now());
        true
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(MIN_SEND_INTERVAL)
    }
}
