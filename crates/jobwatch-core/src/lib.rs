//! Jobwatch Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Async runtimes
//! - Storage
//!
//! All types here describe server-side jobs as the client observes them.

pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod run;
pub mod status;

// Re-export commonly used types
pub use error::JobError;
pub use event::{EventChannel, JobEvent};
pub use ids::JobId;
pub use job::{Job, JobFailure, StepRecord};
pub use run::HistoricalRun;
pub use status::{JobKind, JobStatus};
