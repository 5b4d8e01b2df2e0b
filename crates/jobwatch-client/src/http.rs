//! HTTP implementation of the Job API over the REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use jobwatch_core::{JobError, JobId, JobKind};

use crate::api::{JobApi, StartResponse, StatusReport};

/// Job API client for the REST endpoints under `base_url`.
pub struct HttpJobApi {
    inner: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    kind: JobKind,
    config: &'a Value,
}

impl HttpJobApi {
    /// Create a new client with reqwest defaults.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, JobError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL all endpoint paths are appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job_url(&self, id: &JobId, action: &str) -> String {
        self.url(&format!("/jobs/{}/{}", id, action))
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn start_job(&self, kind: JobKind, config: &Value) -> Result<StartResponse, JobError> {
        let url = self.url("/jobs");
        debug!(url = %url, kind = %kind, "POST start job");

        let response = self
            .inner
            .post(&url)
            .json(&StartRequest { kind, config })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(JobError::ConfigInvalid {
                message: read_message(response).await,
            });
        }
        let response = ensure_success(response).await?;
        response.json().await.map_err(transport_error)
    }

    async fn get_status(&self, id: &JobId) -> Result<StatusReport, JobError> {
        let url = self.job_url(id, "status");
        debug!(url = %url, "GET job status");

        let response = self.inner.get(&url).send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(JobError::NotFound { job_id: id.clone() });
        }
        let response = ensure_success(response).await?;
        response.json().await.map_err(transport_error)
    }

    async fn get_result(&self, id: &JobId) -> Result<Value, JobError> {
        let url = self.job_url(id, "result");
        debug!(url = %url, "GET job result");

        let response = self.inner.get(&url).send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(JobError::NotFound { job_id: id.clone() });
        }
        let response = ensure_success(response).await?;
        response.json().await.map_err(transport_error)
    }

    async fn cancel(&self, id: &JobId) -> Result<(), JobError> {
        let url = self.job_url(id, "cancel");
        debug!(url = %url, "POST cancel job");

        let response = self.inner.post(&url).send().await.map_err(transport_error)?;
        let status = response.status();
        // The job may already be gone or finished.
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            debug!(job_id = %id, status = %status, "Cancel had nothing to do");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> JobError {
    JobError::Transport {
        message: e.to_string(),
        status: e.status().map(|s| s.as_u16()),
    }
}

async fn ensure_success(response: Response) -> Result<Response, JobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = read_message(response).await;
    Err(JobError::Transport {
        message: format!("HTTP {}: {}", status, message),
        status: Some(status.as_u16()),
    })
}

async fn read_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => extract_message(&body).unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

/// Pull a human-readable message out of an error body.
///
/// Accepts `{"message": ...}`, `{"error": "..."}`, `{"error": {"message": ...}}`
/// or a plain-text body.
fn extract_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .or_else(|| Some(body.to_string())),
        Err(_) => Some(body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let api = HttpJobApi::new("http://localhost:8080/api/");
        assert_eq!(api.base_url(), "http://localhost:8080/api");
        assert_eq!(api.url("/jobs"), "http://localhost:8080/api/jobs");
        assert_eq!(
            api.job_url(&JobId::new("abc"), "status"),
            "http://localhost:8080/api/jobs/abc/status"
        );
    }

    #[test]
    fn test_extract_message() {
        assert_eq!(
            extract_message(r#"{"message":"threshold must be positive"}"#).as_deref(),
            Some("threshold must be positive")
        );
        assert_eq!(
            extract_message(r#"{"error":{"message":"bad dataset"}}"#).as_deref(),
            Some("bad dataset")
        );
        assert_eq!(
            extract_message(r#"{"error":"nope"}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(extract_message("gateway down").as_deref(), Some("gateway down"));
        assert_eq!(extract_message("   "), None);
    }

    #[test]
    fn test_start_request_shape() {
        let config = serde_json::json!({ "dataset": "orders" });
        let body = serde_json::to_value(StartRequest {
            kind: JobKind::QualityAnalysis,
            config: &config,
        })
        .unwrap();
        assert_eq!(body["kind"], "quality-analysis");
        assert_eq!(body["config"]["dataset"], "orders");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let api = HttpJobApi::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = api.get_status(&JobId::new("x")).await.unwrap_err();
        assert!(matches!(err, JobError::Transport { .. }));
    }
}
