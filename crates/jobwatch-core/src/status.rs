//! Job kinds and the job status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JobError;

/// The kind of server-side work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Data-quality analysis.
    QualityAnalysis,
    /// Insight analysis.
    InsightAnalysis,
    /// Pipeline execution; the only kind that reports steps.
    PipelineRun,
    /// Report generation.
    ReportGeneration,
}

impl JobKind {
    /// All kinds, in display order.
    pub const ALL: [JobKind; 4] = [
        JobKind::QualityAnalysis,
        JobKind::InsightAnalysis,
        JobKind::PipelineRun,
        JobKind::ReportGeneration,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::QualityAnalysis => "quality-analysis",
            JobKind::InsightAnalysis => "insight-analysis",
            JobKind::PipelineRun => "pipeline-run",
            JobKind::ReportGeneration => "report-generation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| JobError::InvalidJob(format!("unknown job kind: {s}")))
    }
}

/// Status of a job as reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, not yet picked up.
    #[default]
    Pending,
    /// Actively executing.
    Running,
    /// Suspended; may resume.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a user or the system.
    Cancelled,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a job observed in `self` may next be observed in `next`.
    ///
    /// Statuses only move forward: pending, then running, then any number of
    /// paused/running alternations, then a terminal status. Observations are
    /// lossy, so intermediate states may be skipped (pending straight to
    /// completed is fine). Re-observing the same status is always allowed;
    /// nothing leaves a terminal status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running | Self::Paused => next != Self::Pending,
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
