//! Tracker configuration.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use jobwatch_core::{Job, JobKind};

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Poll cadence per job kind, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollIntervals {
    pub quality_analysis_ms: u64,
    pub insight_analysis_ms: u64,
    pub pipeline_run_ms: u64,
    pub report_generation_ms: u64,
}

impl PollIntervals {
    /// Interval for a given kind.
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        let ms = match kind {
            JobKind::QualityAnalysis => self.quality_analysis_ms,
            JobKind::InsightAnalysis => self.insight_analysis_ms,
            JobKind::PipelineRun => self.pipeline_run_ms,
            JobKind::ReportGeneration => self.report_generation_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            quality_analysis_ms: 3_000,
            insight_analysis_ms: 5_000,
            pipeline_run_ms: 2_000,
            report_generation_ms: 2_000,
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Base URL of the job REST API.
    pub api_base_url: String,

    /// Per-request HTTP timeout (seconds).
    pub request_timeout_secs: u64,

    /// Tracking deadline, measured from the first status request (milliseconds).
    pub default_timeout_ms: u64,

    /// Deadline used when waiting for a generated report (milliseconds).
    pub report_timeout_ms: u64,

    /// Poll cadence per kind.
    pub intervals: PollIntervals,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 30,
            default_timeout_ms: 300_000,
            report_timeout_ms: 120_000,
            intervals: PollIntervals::default(),
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }
}

/// Callback invoked with every non-terminal observation.
pub type ProgressCallback = Arc<dyn Fn(&Job) + Send + Sync>;

/// Options for one `track()` call.
#[derive(Clone)]
pub struct TrackOptions {
    /// Kind of the tracked job; used when the cache has no record yet.
    pub kind: JobKind,

    /// Delay between the end of one status request and the next.
    pub interval: Duration,

    /// Deadline measured from the first status request.
    pub timeout: Duration,

    /// Progress callback.
    pub on_progress: Option<ProgressCallback>,
}

impl TrackOptions {
    /// Defaults for `kind` taken from the tracker configuration.
    pub fn for_kind(config: &TrackerConfig, kind: JobKind) -> Self {
        Self {
            kind,
            interval: config.intervals.for_kind(kind),
            timeout: config.default_timeout(),
            on_progress: None,
        }
    }

    /// Builder method to override the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Builder method to override the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to attach a progress callback.
    pub fn on_progress(mut self, callback: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for TrackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackOptions")
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals_by_kind() {
        let config = TrackerConfig::default();
        assert_eq!(
            TrackOptions::for_kind(&config, JobKind::InsightAnalysis).interval,
            Duration::from_millis(5_000)
        );
        assert_eq!(
            TrackOptions::for_kind(&config, JobKind::PipelineRun).interval,
            Duration::from_millis(2_000)
        );
        assert_eq!(config.default_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{ "apiBaseUrl": "https://jobs.internal/api", "intervals": { "pipelineRunMs": 500 } }"#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://jobs.internal/api");
        assert_eq!(config.intervals.pipeline_run_ms, 500);
        assert_eq!(config.intervals.insight_analysis_ms, 5_000);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = TrackerConfig::from_file("/nonexistent/jobwatch.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
