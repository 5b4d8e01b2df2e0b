//! Client-side tracking of long-running server jobs.
//!
//! The pieces compose by explicit injection, leaves first:
//! - [`JobCache`]: last known state of every observed job, plus terminal history
//! - [`EventBus`]: synchronous fan-out of [`JobEvent`]s to subscribers
//! - [`StatusPoller`]: drives one job to a terminal state
//! - [`stats`]: pure aggregation over historical runs
//! - [`JobTracker`]: facade wiring the above to a [`JobApi`]
//!
//! [`JobEvent`]: jobwatch_core::JobEvent
//! [`JobApi`]: jobwatch_client::JobApi

pub mod bus;
pub mod cache;
pub mod config;
pub mod poller;
pub mod stats;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{EventBus, Subscription};
pub use cache::{JobCache, RetentionPolicy, UpsertOutcome};
pub use config::{ConfigError, PollIntervals, TrackOptions, TrackerConfig};
pub use poller::{StatusPoller, TrackHandle, TrackState};
pub use stats::{KindSummary, RunSummary, StatsReport, StepFailure, StepSuccess};
pub use tracker::JobTracker;
