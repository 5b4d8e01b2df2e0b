//! Job cache - the last known state of every observed job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use jobwatch_core::{HistoricalRun, Job, JobError, JobId, JobStatus};

/// What an accepted upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the id.
    Inserted,
    /// An existing record was replaced.
    Updated { previous: JobStatus },
}

impl UpsertOutcome {
    /// Status the job had before this write, if it was known.
    pub fn previous_status(&self) -> Option<JobStatus> {
        match self {
            UpsertOutcome::Inserted => None,
            UpsertOutcome::Updated { previous } => Some(*previous),
        }
    }
}

/// Caller-chosen retention for terminal history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep at most this many runs per job id.
    MaxPerJob(usize),
    /// Drop runs recorded longer ago than this.
    MaxAge(Duration),
    /// Keep at most this many runs overall, newest first.
    MaxTotal(usize),
}

/// Keyed store of job records and their terminal history.
///
/// Writers always supply whole records; there are no partial merges. A write
/// that would move a job backwards through its lifecycle, or change a record
/// that is already terminal, is refused.
#[derive(Default)]
pub struct JobCache {
    jobs: RwLock<HashMap<JobId, Job>>,
    /// Most-recent-first per job id.
    history: RwLock<HashMap<JobId, VecDeque<HistoricalRun>>>,
}

impl JobCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record keyed by `job.id`.
    pub fn upsert(&self, job: Job) -> Result<UpsertOutcome, JobError> {
        job.validate()?;

        let mut jobs = self.jobs_mut();
        let outcome = match jobs.get(&job.id) {
            None => UpsertOutcome::Inserted,
            Some(current) => {
                let frozen = current.is_terminal() && *current != job;
                if frozen || !current.status.can_transition_to(job.status) {
                    warn!(
                        job_id = %job.id,
                        current = %current.status,
                        attempted = %job.status,
                        "Refusing stale job update"
                    );
                    return Err(JobError::InvalidTransition {
                        from: current.status,
                        to: job.status,
                    });
                }
                UpsertOutcome::Updated {
                    previous: current.status,
                }
            }
        };

        debug!(job_id = %job.id, status = %job.status, progress = job.progress, "Cached job");
        jobs.insert(job.id.clone(), job);
        Ok(outcome)
    }

    /// Get a copy of the record for `id`.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs().get(id).cloned()
    }

    /// Evict the record for `id`. History is kept.
    pub fn remove(&self, id: &JobId) -> Option<Job> {
        self.jobs_mut().remove(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Ids of all cached jobs, sorted.
    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of the whole id → record mapping.
    pub fn snapshot(&self) -> HashMap<JobId, Job> {
        self.jobs().clone()
    }

    /// Records that have not reached a terminal status.
    pub fn active(&self) -> Vec<Job> {
        let mut active: Vec<Job> = self
            .jobs()
            .values()
            .filter(|j| j.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Append a terminal snapshot to the history of its job.
    pub fn record_run(&self, run: HistoricalRun) {
        debug!(job_id = %run.job_id, status = %run.status, "Recorded historical run");
        self.history_mut()
            .entry(run.job_id.clone())
            .or_default()
            .push_front(run);
    }

    /// History of one job, most recent first.
    pub fn history(&self, id: &JobId) -> Vec<HistoricalRun> {
        self.history_ref()
            .get(id)
            .map(|runs| runs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All recorded runs across jobs, most recent first.
    pub fn all_history(&self) -> Vec<HistoricalRun> {
        let mut runs: Vec<HistoricalRun> = self
            .history_ref()
            .values()
            .flat_map(|runs| runs.iter().cloned())
            .collect();
        runs.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        runs
    }

    /// Copy of the whole id → history mapping.
    pub fn history_snapshot(&self) -> HashMap<JobId, Vec<HistoricalRun>> {
        self.history_ref()
            .iter()
            .map(|(id, runs)| (id.clone(), runs.iter().cloned().collect()))
            .collect()
    }

    /// Apply a retention policy. Returns the number of runs evicted.
    pub fn prune_history(&self, policy: RetentionPolicy) -> usize {
        let mut history = self.history_mut();
        let before: usize = history.values().map(VecDeque::len).sum();

        match policy {
            RetentionPolicy::MaxPerJob(max) => {
                for runs in history.values_mut() {
                    runs.truncate(max);
                }
            }
            RetentionPolicy::MaxAge(max_age) => {
                let cutoff = Utc::now() - max_age;
                for runs in history.values_mut() {
                    runs.retain(|r| r.recorded_at >= cutoff);
                }
            }
            RetentionPolicy::MaxTotal(max) => {
                let mut all: Vec<(DateTime<Utc>, JobId, usize)> = history
                    .iter()
                    .flat_map(|(id, runs)| {
                        runs.iter()
                            .enumerate()
                            .map(move |(i, r)| (r.recorded_at, id.clone(), i))
                    })
                    .collect();
                all.sort_by(|a, b| b.0.cmp(&a.0));
                let keep: HashSet<(JobId, usize)> = all
                    .into_iter()
                    .take(max)
                    .map(|(_, id, i)| (id, i))
                    .collect();

                for (id, runs) in history.iter_mut() {
                    let mut i = 0;
                    runs.retain(|_| {
                        let kept = keep.contains(&(id.clone(), i));
                        i += 1;
                        kept
                    });
                }
            }
        }
        history.retain(|_, runs| !runs.is_empty());

        let after: usize = history.values().map(VecDeque::len).sum();
        before - after
    }

    fn jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_mut(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn history_ref(&self) -> RwLockReadGuard<'_, HashMap<JobId, VecDeque<HistoricalRun>>> {
        self.history.read().unwrap_or_else(|e| e.into_inner())
    }

    fn history_mut(&self) -> RwLockWriteGuard<'_, HashMap<JobId, VecDeque<HistoricalRun>>> {
        self.history.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_core::{JobKind, JobStatus};

    fn job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::new(JobId::new(id), JobKind::QualityAnalysis);
        job.status = status;
        if status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        if status == JobStatus::Completed {
            job.progress = 100;
        }
        job
    }

    #[test]
    fn test_upsert_and_get() {
        let cache = JobCache::new();
        assert!(cache.get(&JobId::new("a")).is_none());

        let outcome = cache.upsert(job("a", JobStatus::Pending)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = cache.upsert(job("a", JobStatus::Running)).unwrap();
        assert_eq!(outcome.previous_status(), Some(JobStatus::Pending));

        assert_eq!(cache.get(&JobId::new("a")).unwrap().status, JobStatus::Running);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_last_writer_wins_whole_record() {
        let cache = JobCache::new();
        let mut first = job("a", JobStatus::Running);
        first.progress = 40;
        first.steps = vec![jobwatch_core::StepRecord::new("s1", JobStatus::Running)];
        cache.upsert(first).unwrap();

        let mut second = job("a", JobStatus::Running);
        second.progress = 55;
        cache.upsert(second.clone()).unwrap();

        // No field of the earlier record leaks into the new one.
        assert_eq!(cache.get(&JobId::new("a")), Some(second));
    }

    #[test]
    fn test_stale_backward_update_rejected() {
        let cache = JobCache::new();
        cache.upsert(job("a", JobStatus::Running)).unwrap();

        let err = cache.upsert(job("a", JobStatus::Pending)).unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Pending
            }
        );
        assert_eq!(cache.get(&JobId::new("a")).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let cache = JobCache::new();
        let done = job("a", JobStatus::Completed);
        cache.upsert(done.clone()).unwrap();

        assert!(cache.upsert(job("a", JobStatus::Running)).is_err());
        assert!(cache.upsert(job("a", JobStatus::Failed)).is_err());

        // Rewriting the identical record is harmless.
        assert!(cache.upsert(done.clone()).is_ok());
        assert_eq!(cache.get(&JobId::new("a")), Some(done));
    }

    #[test]
    fn test_invalid_record_rejected() {
        let cache = JobCache::new();
        let mut bad = job("a", JobStatus::Failed);
        bad.completed_at = None;
        assert!(matches!(cache.upsert(bad), Err(JobError::InvalidJob(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_active() {
        let cache = JobCache::new();
        cache.upsert(job("a", JobStatus::Running)).unwrap();
        cache.upsert(job("b", JobStatus::Completed)).unwrap();
        cache.upsert(job("c", JobStatus::Paused)).unwrap();

        let active: Vec<String> = cache.active().into_iter().map(|j| j.id.into_inner()).collect();
        assert_eq!(active, vec!["a", "c"]);

        assert!(cache.remove(&JobId::new("a")).is_some());
        assert!(cache.remove(&JobId::new("a")).is_none());
        assert_eq!(cache.ids(), vec![JobId::new("b"), JobId::new("c")]);
    }

    #[test]
    fn test_history_most_recent_first() {
        let cache = JobCache::new();
        let now = Utc::now();
        let mut older = HistoricalRun::new("p", JobKind::PipelineRun, JobStatus::Failed);
        older.recorded_at = now - Duration::minutes(5);
        let newer = HistoricalRun::new("p", JobKind::PipelineRun, JobStatus::Completed);

        cache.record_run(older);
        cache.record_run(newer);

        let history = cache.history(&JobId::new("p"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, JobStatus::Completed);
        assert_eq!(history[1].status, JobStatus::Failed);
        assert!(cache.history(&JobId::new("missing")).is_empty());
    }

    #[test]
    fn test_prune_max_per_job() {
        let cache = JobCache::new();
        for _ in 0..3 {
            cache.record_run(HistoricalRun::new("p", JobKind::PipelineRun, JobStatus::Completed));
        }
        cache.record_run(HistoricalRun::new("q", JobKind::PipelineRun, JobStatus::Completed));

        assert_eq!(cache.prune_history(RetentionPolicy::MaxPerJob(1)), 2);
        assert_eq!(cache.all_history().len(), 2);
    }

    #[test]
    fn test_prune_max_age() {
        let cache = JobCache::new();
        let mut stale = HistoricalRun::new("old", JobKind::ReportGeneration, JobStatus::Completed);
        stale.recorded_at = Utc::now() - Duration::hours(2);
        cache.record_run(stale);
        cache.record_run(HistoricalRun::new("new", JobKind::ReportGeneration, JobStatus::Completed));

        assert_eq!(cache.prune_history(RetentionPolicy::MaxAge(Duration::hours(1))), 1);
        assert!(cache.history(&JobId::new("old")).is_empty());
        assert!(!cache.history_snapshot().contains_key(&JobId::new("old")));
        assert_eq!(cache.history(&JobId::new("new")).len(), 1);
    }

    #[test]
    fn test_prune_max_total_keeps_newest() {
        let cache = JobCache::new();
        let now = Utc::now();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            let mut run = HistoricalRun::new(*id, JobKind::InsightAnalysis, JobStatus::Completed);
            run.recorded_at = now - Duration::minutes(10 - i as i64);
            cache.record_run(run);
        }

        assert_eq!(cache.prune_history(RetentionPolicy::MaxTotal(2)), 2);
        let kept: Vec<String> = cache
            .all_history()
            .into_iter()
            .map(|r| r.job_id.into_inner())
            .collect();
        assert_eq!(kept, vec!["d", "c"]);
    }
}
