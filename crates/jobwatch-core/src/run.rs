//! Terminal snapshots kept for statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::ids::JobId;
use crate::job::{Job, JobFailure, StepRecord};
use crate::status::{JobKind, JobStatus};

/// Snapshot of a job taken when it reached a terminal status.
///
/// Runs are never mutated after creation; retention is decided by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRun {
    pub job_id: JobId,
    pub kind: JobKind,
    /// Terminal status of the job.
    pub status: JobStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    /// When the client captured the snapshot.
    pub recorded_at: DateTime<Utc>,
}

impl HistoricalRun {
    /// Snapshot a terminal job.
    pub fn from_job(job: &Job) -> Result<Self, JobError> {
        if !job.is_terminal() {
            return Err(JobError::InvalidJob(format!(
                "job {} is {}, only terminal jobs can be recorded",
                job.id, job.status
            )));
        }
        Ok(Self {
            job_id: job.id.clone(),
            kind: job.kind,
            status: job.status,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
            steps: job.steps.clone(),
            recorded_at: Utc::now(),
        })
    }

    /// Create a run directly, mostly for imports and tests.
    pub fn new(job_id: impl Into<JobId>, kind: JobKind, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            status,
            started_at: None,
            completed_at: None,
            error: None,
            steps: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Builder method to set both timestamps.
    pub fn with_times(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.completed_at = Some(completed_at);
        self
    }

    /// Builder method to set the failure.
    pub fn with_error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }

    /// Builder method to set step records.
    pub fn with_steps(mut self, steps: Vec<StepRecord>) -> Self {
        self.steps = steps;
        self
    }

    /// Duration in milliseconds when both timestamps are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Step that caused the failure, if recorded.
    pub fn failing_step(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.step.as_deref())
    }
}
