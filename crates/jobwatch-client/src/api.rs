//! The Job API contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobwatch_core::{JobError, JobFailure, JobId, JobKind, JobStatus, StepRecord};

/// Response to a job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: JobId,
}

/// One status observation returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub error: Option<JobFailure>,
    #[serde(default)]
    pub steps: Option<Vec<StepRecord>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// A bare report carrying only a status.
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error: None,
            steps: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder method to set progress.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builder method to set the failure.
    pub fn with_error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }

    /// Builder method to set step records.
    pub fn with_steps(mut self, steps: Vec<StepRecord>) -> Self {
        self.steps = Some(steps);
        self
    }
}

/// Server-side job operations.
///
/// Implementations return typed [`JobError`]s: `ConfigInvalid` from
/// `start_job`, `NotFound` for unknown ids, `Transport` for everything the
/// network or server got wrong.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a job. Fails with `ConfigInvalid` when the server rejects `config`.
    async fn start_job(&self, kind: JobKind, config: &Value) -> Result<StartResponse, JobError>;

    /// Fetch the current status of a job.
    async fn get_status(&self, id: &JobId) -> Result<StatusReport, JobError>;

    /// Fetch the kind-specific result. Only valid once the job completed.
    async fn get_result(&self, id: &JobId) -> Result<Value, JobError>;

    /// Ask the server to cancel a job. Best-effort.
    async fn cancel(&self, id: &JobId) -> Result<(), JobError>;
}
