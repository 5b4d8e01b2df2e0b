//! Job tracker - composes the API client, cache, poller and event bus.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use jobwatch_client::{HttpJobApi, JobApi};
use jobwatch_core::{Job, JobError, JobEvent, JobId, JobKind, JobStatus};

use crate::bus::EventBus;
use crate::cache::{JobCache, UpsertOutcome};
use crate::config::{TrackOptions, TrackerConfig};
use crate::poller::{StatusPoller, TrackHandle};
use crate::stats::{self, StatsReport};

/// Launches jobs, tracks them to completion and reports on their history.
///
/// All collaborators are injected; nothing here is process-global, so two
/// trackers never share a cache or a bus unless handed the same ones.
pub struct JobTracker {
    api: Arc<dyn JobApi>,
    cache: Arc<JobCache>,
    bus: EventBus,
    poller: StatusPoller,
    config: TrackerConfig,
}

impl JobTracker {
    /// Create a tracker from explicit collaborators.
    pub fn new(
        api: Arc<dyn JobApi>,
        cache: Arc<JobCache>,
        bus: EventBus,
        config: TrackerConfig,
    ) -> Self {
        let poller = StatusPoller::new(api.clone(), cache.clone(), bus.clone());
        Self {
            api,
            cache,
            bus,
            poller,
            config,
        }
    }

    /// Create a tracker talking HTTP to `config.api_base_url`, with a fresh
    /// cache and bus.
    pub fn from_config(config: TrackerConfig) -> Result<Self, JobError> {
        let api = HttpJobApi::with_timeout(&config.api_base_url, config.request_timeout())?;
        Ok(Self::new(
            Arc::new(api),
            Arc::new(JobCache::new()),
            EventBus::new(),
            config,
        ))
    }

    pub fn api(&self) -> &Arc<dyn JobApi> {
        &self.api
    }

    pub fn cache(&self) -> &Arc<JobCache> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Default tracking options for `kind`.
    pub fn options(&self, kind: JobKind) -> TrackOptions {
        TrackOptions::for_kind(&self.config, kind)
    }

    /// Submit a job and seed the cache with its pending record.
    pub async fn submit(&self, kind: JobKind, config: &Value) -> Result<JobId, JobError> {
        let id = match self.api.start_job(kind, config).await {
            Ok(response) => response.id,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Job submission failed");
                self.bus.publish(&JobEvent::from_error(None, &e));
                return Err(e);
            }
        };

        info!(job_id = %id, kind = %kind, "Job submitted");
        match self.cache.upsert(Job::new(id.clone(), kind)) {
            Ok(UpsertOutcome::Inserted) => {
                self.bus
                    .publish(&JobEvent::status_change(id.clone(), JobStatus::Pending, None));
            }
            Ok(UpsertOutcome::Updated { .. }) => {}
            Err(e) => warn!(job_id = %id, error = %e, "Submitted job already cached"),
        }
        Ok(id)
    }

    /// Track a submitted job; see [`StatusPoller::track`].
    pub fn track(&self, id: JobId, options: TrackOptions) -> TrackHandle {
        self.poller.track(id, options)
    }

    /// Submit a job and wait for it to reach a terminal status.
    pub async fn run(
        &self,
        kind: JobKind,
        config: &Value,
        mut options: TrackOptions,
    ) -> Result<Job, JobError> {
        options.kind = kind;
        let id = self.submit(kind, config).await?;
        self.track(id, options).wait().await
    }

    /// Fetch the result of a completed job.
    ///
    /// Refuses with `NotCompleted` unless the job has completed. A cached
    /// terminal status is trusted; otherwise the server is asked once.
    pub async fn fetch_result(&self, id: &JobId) -> Result<Value, JobError> {
        let status = match self.cache.get(id) {
            Some(job) if job.is_terminal() => job.status,
            _ => self.api.get_status(id).await?.status,
        };
        if status != JobStatus::Completed {
            return Err(JobError::NotCompleted {
                job_id: id.clone(),
                status,
            });
        }
        self.api.get_result(id).await
    }

    /// Wait for a report-generation job and return the generated report.
    ///
    /// Uses the report deadline from the configuration; running out of time
    /// yields `GenerationTimeout`, a server-side failure yields `JobFailed`.
    pub async fn wait_for_report(&self, id: &JobId) -> Result<Value, JobError> {
        let options = TrackOptions::for_kind(&self.config, JobKind::ReportGeneration)
            .with_timeout(self.config.report_timeout());

        let job = match self.track(id.clone(), options).wait().await {
            Ok(job) => job,
            Err(JobError::Timeout { job_id, elapsed_ms }) => {
                let err = JobError::GenerationTimeout { job_id, elapsed_ms };
                self.bus.publish(&JobEvent::from_error(Some(id.clone()), &err));
                return Err(err);
            }
            Err(e) => return Err(e),
        };

        match job.status {
            JobStatus::Completed => self.api.get_result(id).await,
            JobStatus::Cancelled => Err(JobError::Cancelled { job_id: id.clone() }),
            _ => {
                let (message, step) = match job.error {
                    Some(failure) => (failure.message, failure.step),
                    None => ("report generation failed".to_string(), None),
                };
                Err(JobError::JobFailed {
                    job_id: id.clone(),
                    message,
                    step,
                })
            }
        }
    }

    /// Stop tracking `id` locally and ask the server to cancel it.
    pub async fn cancel(&self, id: &JobId) -> Result<(), JobError> {
        let was_tracking = self.poller.cancel(id);
        info!(job_id = %id, was_tracking, "Cancelling job");
        self.api.cancel(id).await
    }

    /// Statistics over every recorded run.
    pub fn statistics(&self) -> StatsReport {
        stats::report(&self.cache.all_history())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use jobwatch_client::StatusReport;
    use jobwatch_core::{EventChannel, JobFailure};
    use serde_json::json;

    use crate::testing::FakeApi;

    fn tracker(api: Arc<FakeApi>) -> JobTracker {
        let mut config = TrackerConfig::default();
        config.intervals.quality_analysis_ms = 100;
        config.intervals.report_generation_ms = 100;
        config.report_timeout_ms = 1_000;
        JobTracker::new(api, Arc::new(JobCache::new()), EventBus::new(), config)
    }

    fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<JobEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe_all(move |e| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });
        events
    }

    #[tokio::test]
    async fn test_submit_seeds_cache_and_announces_pending() {
        let api = Arc::new(FakeApi::new());
        let tracker = tracker(api.clone());
        let events = record_events(tracker.bus());

        let id = tracker
            .submit(JobKind::QualityAnalysis, &json!({ "dataset": "orders" }))
            .await
            .unwrap();

        assert_eq!(id, JobId::new("job-1"));
        assert_eq!(tracker.cache().get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(api.started()[0].0, JobKind::QualityAnalysis);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            JobEvent::StatusChange {
                status: JobStatus::Pending,
                previous_status: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_invalid_config() {
        let api = Arc::new(FakeApi::new());
        let tracker = tracker(api.clone());
        let events = record_events(tracker.bus());

        let err = tracker
            .submit(JobKind::InsightAnalysis, &json!({ "invalid": true }))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::ConfigInvalid { .. }));
        assert!(tracker.cache().is_empty());
        let channels: Vec<EventChannel> =
            events.lock().unwrap().iter().map(JobEvent::channel).collect();
        assert_eq!(channels, vec![EventChannel::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_to_completion_feeds_statistics() {
        let api = Arc::new(FakeApi::new());
        api.script(
            "job-1",
            vec![
                Ok(StatusReport::new(JobStatus::Running).with_progress(50)),
                Ok(StatusReport::new(JobStatus::Completed)),
            ],
        );
        let tracker = tracker(api.clone());
        let events = record_events(tracker.bus());

        let options = tracker.options(JobKind::QualityAnalysis);
        let job = tracker
            .run(JobKind::QualityAnalysis, &json!({}), options)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        let stats = tracker.statistics();
        assert_eq!(stats.summary.total_runs, 1);
        assert!((stats.summary.success_rate - 100.0).abs() < 1e-9);

        let channels: Vec<EventChannel> =
            events.lock().unwrap().iter().map(JobEvent::channel).collect();
        assert_eq!(
            channels,
            vec![
                EventChannel::StatusChange,
                EventChannel::StatusChange,
                EventChannel::StatusChange,
                EventChannel::RunComplete,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_result_requires_completion() {
        let api = Arc::new(FakeApi::new());
        api.script(
            "job-1",
            vec![
                Ok(StatusReport::new(JobStatus::Running)),
                Ok(StatusReport::new(JobStatus::Completed)),
            ],
        );
        api.set_result("job-1", json!({ "score": 0.97 }));
        let tracker = tracker(api.clone());

        let id = tracker.submit(JobKind::QualityAnalysis, &json!({})).await.unwrap();
        assert_eq!(
            tracker.fetch_result(&id).await.unwrap_err(),
            JobError::NotCompleted {
                job_id: id.clone(),
                status: JobStatus::Running
            }
        );

        tracker
            .track(id.clone(), tracker.options(JobKind::QualityAnalysis))
            .wait()
            .await
            .unwrap();
        assert_eq!(tracker.fetch_result(&id).await.unwrap()["score"], 0.97);
    }

    #[tokio::test]
    async fn test_fetch_result_rechecks_pending_cached_job() {
        let api = Arc::new(FakeApi::new());
        api.script("job-1", vec![Ok(StatusReport::new(JobStatus::Completed))]);
        api.set_result("job-1", json!({ "rows": 12 }));
        let tracker = tracker(api.clone());

        let id = tracker.submit(JobKind::PipelineRun, &json!({})).await.unwrap();
        assert_eq!(
            tracker.cache().get(&id).map(|j| j.status),
            Some(JobStatus::Pending)
        );

        assert_eq!(tracker.fetch_result(&id).await.unwrap()["rows"], 12);
        assert_eq!(api.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_result_for_uncached_job_checks_server() {
        let api = Arc::new(FakeApi::new());
        api.script("remote", vec![Ok(StatusReport::new(JobStatus::Running))]);
        let tracker = tracker(api);

        let err = tracker.fetch_result(&JobId::new("remote")).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::NotCompleted {
                status: JobStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_report() {
        let api = Arc::new(FakeApi::new());
        api.script(
            "r-1",
            vec![
                Ok(StatusReport::new(JobStatus::Running)),
                Ok(StatusReport::new(JobStatus::Completed)),
            ],
        );
        api.set_result("r-1", json!({ "url": "/reports/r-1.pdf" }));
        let tracker = tracker(api);

        let report = tracker.wait_for_report(&JobId::new("r-1")).await.unwrap();
        assert_eq!(report["url"], "/reports/r-1.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_report_generation_timeout() {
        let api = Arc::new(FakeApi::new());
        api.script("r-1", vec![Ok(StatusReport::new(JobStatus::Running))]);
        let tracker = tracker(api);
        let events = record_events(tracker.bus());

        let err = tracker.wait_for_report(&JobId::new("r-1")).await.unwrap_err();
        match err {
            JobError::GenerationTimeout { elapsed_ms, .. } => assert!(elapsed_ms >= 1_000),
            other => panic!("Expected GenerationTimeout, got {other:?}"),
        }

        let codes: Vec<Option<String>> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                JobEvent::Error { code, .. } => Some(code.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            codes,
            vec![
                Some("timeout".to_string()),
                Some("generation_timeout".to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_report_failure() {
        let api = Arc::new(FakeApi::new());
        api.script(
            "r-1",
            vec![Ok(StatusReport::new(JobStatus::Failed)
                .with_error(JobFailure::new("template missing")))],
        );
        let tracker = tracker(api);

        let err = tracker.wait_for_report(&JobId::new("r-1")).await.unwrap_err();
        assert_eq!(
            err,
            JobError::JobFailed {
                job_id: JobId::new("r-1"),
                message: "template missing".to_string(),
                step: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_tracking_and_notifies_server() {
        let api = Arc::new(FakeApi::new());
        api.script("job-1", vec![Ok(StatusReport::new(JobStatus::Running))]);
        let tracker = tracker(api.clone());

        let handle = tracker.track(
            JobId::new("job-1"),
            tracker
                .options(JobKind::QualityAnalysis)
                .with_interval(Duration::from_secs(1)),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        tracker.cancel(&JobId::new("job-1")).await.unwrap();
        assert!(matches!(handle.wait().await, Err(JobError::Cancelled { .. })));
        assert_eq!(api.cancelled(), vec![JobId::new("job-1")]);
    }

    #[test]
    fn test_independent_trackers_do_not_share_state() {
        let a = tracker(Arc::new(FakeApi::new()));
        let b = tracker(Arc::new(FakeApi::new()));
        a.cache().upsert(Job::new(JobId::new("x"), JobKind::PipelineRun)).unwrap();
        assert!(b.cache().is_empty());
    }
}
