//! Core domain errors.

use thiserror::Error;

use crate::ids::JobId;
use crate::status::JobStatus;

/// Errors surfaced while launching, tracking or reading jobs.
///
/// The set is closed: callers match on it exhaustively instead of probing
/// for fields. `Clone` lets one tracking outcome reach every attached caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// The server rejected the submitted configuration. User-correctable.
    #[error("Invalid job configuration: {message}")]
    ConfigInvalid { message: String },

    /// The server does not know the job id.
    #[error("Job not found: {job_id}")]
    NotFound { job_id: JobId },

    /// Network or server unavailability.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// Client-side deadline passed before the server reported a terminal status.
    #[error("Timed out tracking job {job_id} after {elapsed_ms}ms")]
    Timeout { job_id: JobId, elapsed_ms: u64 },

    /// Report generation did not finish within the waiting deadline.
    #[error("Report generation for job {job_id} timed out after {elapsed_ms}ms")]
    GenerationTimeout { job_id: JobId, elapsed_ms: u64 },

    /// Tracking was cancelled by the caller.
    #[error("Tracking cancelled for job {job_id}")]
    Cancelled { job_id: JobId },

    /// The server reported the job as failed.
    #[error("Job {job_id} failed: {message}")]
    JobFailed {
        job_id: JobId,
        message: String,
        step: Option<String>,
    },

    /// A result was requested before the job completed successfully.
    #[error("Job {job_id} has no result yet (status: {status})")]
    NotCompleted { job_id: JobId, status: JobStatus },

    /// A record would move a job backwards through its lifecycle.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// A job record violates the data-model invariants.
    #[error("Invalid job record: {0}")]
    InvalidJob(String),

    /// Tracking stopped without producing an outcome.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Build a transport error without an HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Stable machine-readable code, used as the `code` of error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "config_invalid",
            Self::NotFound { .. } => "not_found",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::JobFailed { .. } => "job_failed",
            Self::NotCompleted { .. } => "not_completed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidJob(_) => "invalid_job",
            Self::Internal(_) => "internal",
        }
    }

    /// The job this error concerns, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::NotFound { job_id }
            | Self::Timeout { job_id, .. }
            | Self::GenerationTimeout { job_id, .. }
            | Self::Cancelled { job_id }
            | Self::JobFailed { job_id, .. }
            | Self::NotCompleted { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Returns true for client-side deadline errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::GenerationTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_for_deadlines_and_transport() {
        let timeout = JobError::Timeout {
            job_id: JobId::new("a"),
            elapsed_ms: 250,
        };
        let transport = JobError::transport("connection refused");

        assert_eq!(timeout.code(), "timeout");
        assert_eq!(transport.code(), "transport");
        assert!(timeout.is_timeout());
        assert!(!transport.is_timeout());
        assert_eq!(timeout.job_id(), Some(&JobId::new("a")));
        assert_eq!(transport.job_id(), None);
    }

    #[test]
    fn test_display_carries_reason() {
        let err = JobError::GenerationTimeout {
            job_id: JobId::new("r-1"),
            elapsed_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Report generation for job r-1 timed out after 1000ms"
        );
    }
}
