//! Job records as last observed from the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::ids::JobId;
use crate::status::{JobKind, JobStatus};

/// Failure details attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Human-readable failure message.
    pub message: String,

    /// Identifier of the failing step (pipeline jobs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl JobFailure {
    /// Create a failure without step information.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
        }
    }

    /// Builder method to record the failing step.
    pub fn at_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

/// One step of a pipeline job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Step identifier, stable across runs of the same pipeline.
    pub id: String,

    /// Step status.
    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    /// Create a step in the given status with no timestamps.
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// The last known state of one server-side job.
///
/// Invariants, checked by [`Job::validate`] and on deserialization:
/// - `completed_at` is set if and only if `status` is terminal
/// - `progress` is at most 100, and exactly 100 once completed
/// - `error` is only present on failed jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "JobRecord")]
pub struct Job {
    /// Server-assigned identifier.
    pub id: JobId,

    /// Kind of work.
    pub kind: JobKind,

    /// Current status.
    pub status: JobStatus,

    /// Progress percentage, 0-100.
    pub progress: u8,

    /// When the job started running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure details (failed jobs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,

    /// Ordered step records (pipeline jobs only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

impl Job {
    /// Create a freshly submitted, pending job.
    pub fn new(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Pending,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            steps: Vec::new(),
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration in milliseconds, when both timestamps are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Verify the record satisfies the data-model invariants.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.progress > 100 {
            return Err(JobError::InvalidJob(format!(
                "job {}: progress {} exceeds 100",
                self.id, self.progress
            )));
        }
        if self.completed_at.is_some() != self.status.is_terminal() {
            return Err(JobError::InvalidJob(format!(
                "job {}: completedAt must be set exactly when terminal (status {})",
                self.id, self.status
            )));
        }
        if self.status == JobStatus::Completed && self.progress != 100 {
            return Err(JobError::InvalidJob(format!(
                "job {}: completed with progress {}",
                self.id, self.progress
            )));
        }
        if self.error.is_some() && self.status != JobStatus::Failed {
            return Err(JobError::InvalidJob(format!(
                "job {}: error present on {} job",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// Unvalidated wire shape of [`Job`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRecord {
    id: JobId,
    kind: JobKind,
    status: JobStatus,
    #[serde(default)]
    progress: u8,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<JobFailure>,
    #[serde(default)]
    steps: Vec<StepRecord>,
}

impl TryFrom<JobRecord> for Job {
    type Error = JobError;

    fn try_from(r: JobRecord) -> Result<Self, Self::Error> {
        let job = Job {
            id: r.id,
            kind: r.kind,
            status: r.status,
            progress: r.progress,
            started_at: r.started_at,
            completed_at: r.completed_at,
            error: r.error,
            steps: r.steps,
        };
        job.validate()?;
        Ok(job)
    }
}
