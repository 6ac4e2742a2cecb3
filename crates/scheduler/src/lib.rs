//! The delivery pipeline: per-source polling on independent timers and the
//! retention sweep.

pub mod poller;
pub mod scheduler;
pub mod sweeper;

pub use poller::{PollError, PollReport, SourcePoller};
pub use scheduler::{FeedScheduler, SourceState, SourceStatus};
pub use sweeper::{RetentionSweeper, SweepOutcome};
