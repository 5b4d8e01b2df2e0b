//! Scripted in-memory Job API for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use jobwatch_client::{JobApi, StartResponse, StatusReport};
use jobwatch_core::{JobError, JobId, JobKind};

/// Replays scripted status responses per job. The last scripted response
/// for a job repeats forever.
#[derive(Default)]
pub(crate) struct FakeApi {
    scripts: Mutex<HashMap<JobId, VecDeque<Result<StatusReport, JobError>>>>,
    results: Mutex<HashMap<JobId, Value>>,
    started: Mutex<Vec<(JobKind, Value)>>,
    cancelled: Mutex<Vec<JobId>>,
    latency: Duration,
    next_id: AtomicUsize,
    status_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status request takes `latency` to answer.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn script(&self, id: &str, responses: Vec<Result<StatusReport, JobError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(JobId::new(id), responses.into());
    }

    pub fn set_result(&self, id: &str, result: Value) {
        self.results.lock().unwrap().insert(JobId::new(id), result);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<(JobKind, Value)> {
        self.started.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.lock().unwrap().clone()
    }

    fn next_response(&self, id: &JobId) -> Result<StatusReport, JobError> {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(id) else {
            return Err(JobError::NotFound { job_id: id.clone() });
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(JobError::NotFound { job_id: id.clone() }))
        }
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn start_job(&self, kind: JobKind, config: &Value) -> Result<StartResponse, JobError> {
        if config.get("invalid").and_then(Value::as_bool) == Some(true) {
            return Err(JobError::ConfigInvalid {
                message: "dataset is required".to_string(),
            });
        }
        self.started.lock().unwrap().push((kind, config.clone()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StartResponse {
            id: JobId::new(format!("job-{n}")),
        })
    }

    async fn get_status(&self, id: &JobId) -> Result<StatusReport, JobError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = self.next_response(id);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn get_result(&self, id: &JobId) -> Result<Value, JobError> {
        self.results
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound { job_id: id.clone() })
    }

    async fn cancel(&self, id: &JobId) -> Result<(), JobError> {
        self.cancelled.lock().unwrap().push(id.clone());
        Ok(())
    }
}
