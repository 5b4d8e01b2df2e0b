//! Event payloads published when tracked jobs change state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::JobError;
use crate::ids::JobId;
use crate::status::JobStatus;

/// Named channel an event is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventChannel {
    StatusChange,
    RunComplete,
    Error,
}

impl EventChannel {
    /// Channel name as used by views.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::StatusChange => "status-change",
            EventChannel::RunComplete => "run-complete",
            EventChannel::Error => "error",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job state notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobEvent {
    /// A tracked job was observed in a new status.
    #[serde(rename_all = "camelCase")]
    StatusChange {
        job_id: JobId,
        status: JobStatus,
        /// None when the job was first seen.
        previous_status: Option<JobStatus>,
        timestamp: DateTime<Utc>,
    },

    /// A tracked job reached a terminal status.
    #[serde(rename_all = "camelCase")]
    RunComplete {
        job_id: JobId,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// Something went wrong; notification only.
    #[serde(rename_all = "camelCase")]
    Error {
        job_id: Option<JobId>,
        message: String,
        code: Option<String>,
    },
}

impl JobEvent {
    /// Create a StatusChange event stamped now.
    pub fn status_change(
        job_id: JobId,
        status: JobStatus,
        previous_status: Option<JobStatus>,
    ) -> Self {
        Self::StatusChange {
            job_id,
            status,
            previous_status,
            timestamp: Utc::now(),
        }
    }

    /// Create a RunComplete event stamped now.
    pub fn run_complete(job_id: JobId, status: JobStatus) -> Self {
        Self::RunComplete {
            job_id,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Create an Error event from a job error.
    pub fn from_error(job_id: Option<JobId>, error: &JobError) -> Self {
        Self::Error {
            job_id: job_id.or_else(|| error.job_id().cloned()),
            message: error.to_string(),
            code: Some(error.code().to_string()),
        }
    }

    /// Channel this event belongs to.
    pub fn channel(&self) -> EventChannel {
        match self {
            JobEvent::StatusChange { .. } => EventChannel::StatusChange,
            JobEvent::RunComplete { .. } => EventChannel::RunComplete,
            JobEvent::Error { .. } => EventChannel::Error,
        }
    }

    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::StatusChange { job_id, .. } | JobEvent::RunComplete { job_id, .. } => {
                Some(job_id)
            }
            JobEvent::Error { job_id, .. } => job_id.as_ref(),
        }
    }
}
