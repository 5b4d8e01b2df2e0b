//! Status poller - drives one job to a terminal state.
//!
//! Each tracked job id owns exactly one polling task, so there is never more
//! than one status request in flight per job. A second `track()` for an id
//! that is already being tracked attaches to the running task instead of
//! starting another one: both handles resolve with the same outcome and the
//! second caller's progress callback joins the first. The first caller's
//! interval and timeout stay in effect.
//!
//! The loop checks its cancellation token before every request and while
//! waiting for the next tick. A request already in flight is allowed to
//! finish; handles resolve as soon as cancellation is requested.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jobwatch_client::{JobApi, StatusReport};
use jobwatch_core::{HistoricalRun, Job, JobError, JobEvent, JobId, JobStatus};

use crate::bus::EventBus;
use crate::cache::JobCache;
use crate::config::{ProgressCallback, TrackOptions};

type Outcome = Option<Result<Job, JobError>>;

/// Tracking state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Not started yet.
    Idle,
    /// A status request is in flight or scheduled.
    Polling,
    /// Server reported `completed`.
    Succeeded,
    /// Server reported `failed`, or tracking hit an unrecoverable error.
    Failed,
    /// Server reported `cancelled`, or the caller cancelled tracking.
    Cancelled,
    /// Deadline passed without a server-reported terminal status.
    TimedOut,
}

impl TrackState {
    /// Returns true once tracking has stopped.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackState::Idle | TrackState::Polling)
    }

    fn from_outcome(result: &Result<Job, JobError>) -> Self {
        match result {
            Ok(job) => match job.status {
                JobStatus::Completed => TrackState::Succeeded,
                JobStatus::Cancelled => TrackState::Cancelled,
                _ => TrackState::Failed,
            },
            Err(JobError::Timeout { .. }) => TrackState::TimedOut,
            Err(JobError::Cancelled { .. }) => TrackState::Cancelled,
            Err(_) => TrackState::Failed,
        }
    }
}

/// Caller's view of a tracked job.
pub struct TrackHandle {
    job_id: JobId,
    attached: bool,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
    state: watch::Receiver<TrackState>,
}

impl TrackHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// True if this handle joined tracking started by an earlier call.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Current tracking state.
    pub fn state(&self) -> TrackState {
        *self.state.borrow()
    }

    /// Stop scheduling further polls for this job.
    ///
    /// Shared by every handle attached to the same tracking.
    pub fn cancel(&self) {
        info!(job_id = %self.job_id, "Cancelling job tracking");
        self.cancel.cancel();
    }

    /// Wait for the final job record.
    ///
    /// Resolves with the job once the server reports a terminal status, or
    /// with `Timeout`, `Cancelled`, `NotFound` or `Transport` errors.
    pub async fn wait(mut self) -> Result<Job, JobError> {
        loop {
            let current = self.outcome.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }

            tokio::select! {
                biased;
                changed = self.outcome.changed() => {
                    if changed.is_err() {
                        let last = self.outcome.borrow().clone();
                        return last.unwrap_or_else(|| {
                            Err(JobError::Internal(format!(
                                "tracking for job {} stopped without an outcome",
                                self.job_id
                            )))
                        });
                    }
                }
                _ = self.cancel.cancelled() => {
                    return Err(JobError::Cancelled { job_id: self.job_id.clone() });
                }
            }
        }
    }
}

struct Tracking {
    generation: u64,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
    state: watch::Receiver<TrackState>,
    callbacks: Arc<Mutex<Vec<ProgressCallback>>>,
}

struct PollerInner {
    api: Arc<dyn JobApi>,
    cache: Arc<JobCache>,
    bus: EventBus,
    active: Mutex<HashMap<JobId, Tracking>>,
    next_generation: AtomicU64,
}

impl PollerInner {
    fn active(&self) -> MutexGuard<'_, HashMap<JobId, Tracking>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, job_id: &JobId, generation: u64) {
        let mut active = self.active();
        if active.get(job_id).map(|t| t.generation) == Some(generation) {
            active.remove(job_id);
        }
    }
}

/// Releases a job's `active` entry when its polling task ends, including
/// when the task unwinds.
struct FinishGuard {
    inner: Arc<PollerInner>,
    job_id: JobId,
    generation: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.inner.finish(&self.job_id, self.generation);
    }
}

/// Drives tracked jobs to terminal states, one polling task per job id.
#[derive(Clone)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

impl StatusPoller {
    /// Create a poller over an API client, a cache and an event bus.
    pub fn new(api: Arc<dyn JobApi>, cache: Arc<JobCache>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                api,
                cache,
                bus,
                active: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start tracking `job_id`, or attach to tracking already in progress.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn track(&self, job_id: JobId, options: TrackOptions) -> TrackHandle {
        let mut active = self.inner.active();

        if let Some(existing) = active.get(&job_id) {
            debug!(job_id = %job_id, "Attaching to existing tracking");
            if let Some(callback) = options.on_progress {
                existing
                    .callbacks
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(callback);
            }
            return TrackHandle {
                job_id,
                attached: true,
                cancel: existing.cancel.clone(),
                outcome: existing.outcome.clone(),
                state: existing.state.clone(),
            };
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(TrackState::Idle);
        let callbacks = Arc::new(Mutex::new(options.on_progress.iter().cloned().collect()));

        active.insert(
            job_id.clone(),
            Tracking {
                generation,
                cancel: cancel.clone(),
                outcome: outcome_rx.clone(),
                state: state_rx.clone(),
                callbacks: callbacks.clone(),
            },
        );
        drop(active);

        info!(
            job_id = %job_id,
            kind = %options.kind,
            interval_ms = options.interval.as_millis() as u64,
            timeout_ms = options.timeout.as_millis() as u64,
            "Tracking job"
        );

        let run = PollLoop {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
            options,
            cancel: cancel.clone(),
            state: state_tx,
            callbacks,
        };
        let guard = FinishGuard {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
            generation,
        };
        tokio::spawn(async move {
            let _guard = guard;
            let result = run.run().await;
            run.state.send_replace(TrackState::from_outcome(&result));
            outcome_tx.send_replace(Some(result));
        });

        TrackHandle {
            job_id,
            attached: false,
            cancel,
            outcome: outcome_rx,
            state: state_rx,
        }
    }

    /// Cancel tracking of `job_id`. Returns false if it was not being tracked.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.inner.active().get(job_id) {
            Some(tracking) => {
                info!(job_id = %job_id, "Cancelling job tracking");
                tracking.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a polling task is currently running for `job_id`.
    pub fn is_tracking(&self, job_id: &JobId) -> bool {
        self.inner.active().contains_key(job_id)
    }

    /// Ids currently being tracked.
    pub fn tracked_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.inner.active().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// One job's polling loop.
struct PollLoop {
    inner: Arc<PollerInner>,
    job_id: JobId,
    options: TrackOptions,
    cancel: CancellationToken,
    state: watch::Sender<TrackState>,
    callbacks: Arc<Mutex<Vec<ProgressCallback>>>,
}

/// What a single status observation means for the loop.
enum Step {
    Continue(Job),
    Done(Job),
}

impl PollLoop {
    async fn run(&self) -> Result<Job, JobError> {
        let mut started: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(job_id = %self.job_id, "Tracking cancelled");
                return Err(JobError::Cancelled {
                    job_id: self.job_id.clone(),
                });
            }

            self.state.send_replace(TrackState::Polling);
            // The deadline counts from the first request, not from submission.
            let first = *started.get_or_insert_with(Instant::now);
            let deadline = first + self.options.timeout;

            debug!(job_id = %self.job_id, "Polling job status");
            let report = match self.inner.api.get_status(&self.job_id).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(job_id = %self.job_id, error = %e, "Status request failed");
                    self.inner
                        .bus
                        .publish(&JobEvent::from_error(Some(self.job_id.clone()), &e));
                    return Err(e);
                }
            };

            let job = match self.observe(report)? {
                Step::Done(job) => return Ok(job),
                Step::Continue(job) => job,
            };
            self.notify_progress(&job);

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(first));
            }

            let next = now + self.options.interval;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(job_id = %self.job_id, "Tracking cancelled");
                    return Err(JobError::Cancelled { job_id: self.job_id.clone() });
                }
                _ = sleep_until(next.min(deadline)) => {}
            }

            if next >= deadline {
                return Err(self.timed_out(first));
            }
        }
    }

    /// Fold a status report into a full record, write it to the cache and
    /// publish what changed.
    fn observe(&self, report: StatusReport) -> Result<Step, JobError> {
        let cache = &self.inner.cache;
        let previous = cache
            .get(&self.job_id)
            .unwrap_or_else(|| Job::new(self.job_id.clone(), self.options.kind));
        let job = merge_report(previous, report);

        let outcome = match cache.upsert(job.clone()) {
            Ok(outcome) => outcome,
            Err(JobError::InvalidTransition { from, to }) => {
                warn!(
                    job_id = %self.job_id,
                    cached = %from,
                    reported = %to,
                    "Ignoring status that would move job backwards"
                );
                return Ok(match cache.get(&self.job_id) {
                    Some(current) if current.is_terminal() => Step::Done(current),
                    Some(current) => Step::Continue(current),
                    None => Step::Continue(job),
                });
            }
            Err(e) => return Err(e),
        };

        let previous_status = outcome.previous_status();
        if previous_status != Some(job.status) {
            info!(
                job_id = %self.job_id,
                status = %job.status,
                previous = ?previous_status,
                progress = job.progress,
                "Job status changed"
            );
            self.inner.bus.publish(&JobEvent::status_change(
                self.job_id.clone(),
                job.status,
                previous_status,
            ));
        }

        if !job.is_terminal() {
            return Ok(Step::Continue(job));
        }
        // Already terminal before this observation: the run was recorded then.
        if previous_status.is_some_and(|s| s.is_terminal()) {
            debug!(job_id = %self.job_id, status = %job.status, "Job already terminal");
            return Ok(Step::Done(job));
        }

        match HistoricalRun::from_job(&job) {
            Ok(run) => cache.record_run(run),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "Could not record run"),
        }
        self.inner
            .bus
            .publish(&JobEvent::run_complete(self.job_id.clone(), job.status));
        info!(job_id = %self.job_id, status = %job.status, "Job reached terminal status");
        Ok(Step::Done(job))
    }

    fn notify_progress(&self, job: &Job) {
        let callbacks: Vec<ProgressCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(job))).is_err() {
                error!(job_id = %self.job_id, "Progress callback panicked");
            }
        }
    }

    fn timed_out(&self, first: Instant) -> JobError {
        let elapsed = Instant::now().duration_since(first);
        let err = JobError::Timeout {
            job_id: self.job_id.clone(),
            elapsed_ms: duration_ms(elapsed),
        };
        warn!(job_id = %self.job_id, elapsed_ms = duration_ms(elapsed), "Job tracking timed out");
        self.inner
            .bus
            .publish(&JobEvent::from_error(Some(self.job_id.clone()), &err));
        err
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Build the next full record from the previous one and a status report.
///
/// Progress never decreases while the job is active and is pinned to 100
/// on completion. `completed_at` is set exactly when the status is terminal.
fn merge_report(previous: Job, report: StatusReport) -> Job {
    let now = Utc::now();
    let status = report.status;
    let reported = report.progress.unwrap_or(previous.progress).min(100);

    let progress = match status {
        JobStatus::Completed => 100,
        s if s.is_active() => reported.max(previous.progress),
        _ => reported,
    };

    let started_at = report
        .started_at
        .or(previous.started_at)
        .or_else(|| (status != JobStatus::Pending).then_some(now));

    let completed_at = if status.is_terminal() {
        report.completed_at.or(Some(now))
    } else {
        None
    };

    Job {
        id: previous.id,
        kind: previous.kind,
        status,
        progress,
        started_at,
        completed_at,
        error: if status == JobStatus::Failed {
            report.error
        } else {
            None
        },
        steps: report.steps.unwrap_or(previous.steps),
    }
}
