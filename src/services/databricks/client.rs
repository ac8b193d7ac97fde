//! Workspace REST client with retry logic.
//!
//! Transient statuses (429, 5xx) retry with exponential backoff; 401/403 is
//! fatal and aborts the run. Item-level failures are sent over a channel to
//! the orchestrator's drain instead of being raised.

use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

const RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_SECS: u64 = 2;
const RETRY_MAX_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// 401/403 — aborts the whole run.
    #[error("Auth error {status}: check access token")]
    Fatal { status: u16 },

    #[error("HTTP {status} for {url}")]
    Retryable { status: u16, url: String },

    #[error("{0}")]
    Other(String),
}

/// One item-level failure, reported through the failure channel.
#[derive(Debug, Clone, Serialize)]
pub struct ApiFailure {
    pub path: String,
    pub operation: String,
    pub error: String,
}

pub struct WorkspaceClient {
    base_url: String,
    client: reqwest::Client,
    failures_tx: mpsc::UnboundedSender<ApiFailure>,
    failure_count: AtomicUsize,
}

impl WorkspaceClient {
    /// Returns the client plus the receiving half of its failure channel;
    /// the orchestrator drains it into the run's failure ledger.
    pub fn new(
        instance_url: &str,
        access_token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ApiFailure>), WorkspaceError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| WorkspaceError::Other(e.to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WorkspaceError::Other(e.to_string()))?;

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        tracing::info!("Workspace client initialized for {}", instance_url);
        Ok((
            Self {
                base_url: instance_url.trim_end_matches('/').to_string(),
                client,
                failures_tx,
                failure_count: AtomicUsize::new(0),
            },
            failures_rx,
        ))
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    fn record_failure(&self, path: &str, operation: &str, error: String) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Workspace {} failed for {}: {}", operation, path, error);
        let _ = self.failures_tx.send(ApiFailure {
            path: path.to_string(),
            operation: operation.to_string(),
            error,
        });
    }

    async fn api_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, WorkspaceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut attempt = 0;
        loop {
            let result = self.client.get(&url).query(params).send().await;
            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    // Network-level problems retry like 5xx.
                    if attempt + 1 < RETRY_ATTEMPTS {
                        attempt += 1;
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(WorkspaceError::Other(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            if status == 200 {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| WorkspaceError::Other(e.to_string()));
            }
            if matches!(status, 429 | 500 | 502 | 503 | 504) {
                if attempt + 1 < RETRY_ATTEMPTS {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                return Err(WorkspaceError::Retryable { status, url });
            }
            if status == 401 || status == 403 {
                return Err(WorkspaceError::Fatal { status });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(WorkspaceError::Other(format!(
                "HTTP {} for {}: {}",
                status,
                url,
                crate::utils::truncate_chars(&body, 200)
            )));
        }
    }

    /// Connectivity probe against the workspace root.
    pub async fn test_connection(&self) -> Result<(), WorkspaceError> {
        self.api_get("/api/2.0/workspace/list", &[("path", "/Workspace".to_string())])
            .await
            .map(|_| ())
    }

    /// List objects under a workspace path. Item-level errors are recorded
    /// and produce an empty list; only auth errors propagate.
    pub async fn list_workspace_path(&self, path: &str) -> Result<Vec<Value>, WorkspaceError> {
        match self
            .api_get("/api/2.0/workspace/list", &[("path", path.to_string())])
            .await
        {
            Ok(data) => Ok(data["objects"].as_array().cloned().unwrap_or_default()),
            Err(e @ WorkspaceError::Fatal { .. }) => Err(e),
            Err(e) => {
                self.record_failure(path, "list", e.to_string());
                Ok(Vec::new())
            }
        }
    }

    /// Export notebook content in SOURCE format. Returns (content, file_type).
    pub async fn export_notebook(
        &self,
        path: &str,
    ) -> Result<Option<(String, String)>, WorkspaceError> {
        match self
            .api_get(
                "/api/2.0/workspace/export",
                &[("path", path.to_string()), ("format", "SOURCE".to_string())],
            )
            .await
        {
            Ok(data) => {
                let file_type = data["file_type"].as_str().unwrap_or("python").to_string();
                match data["content"].as_str() {
                    Some(encoded) => match base64::engine::general_purpose::STANDARD.decode(encoded)
                    {
                        Ok(bytes) => {
                            Ok(Some((String::from_utf8_lossy(&bytes).into_owned(), file_type)))
                        }
                        Err(e) => {
                            self.record_failure(path, "export", format!("base64: {}", e));
                            Ok(None)
                        }
                    },
                    None => Ok(None),
                }
            }
            Err(e @ WorkspaceError::Fatal { .. }) => Err(e),
            Err(e) => {
                self.record_failure(path, "export", e.to_string());
                Ok(None)
            }
        }
    }

    /// Metadata for one workspace object.
    pub async fn get_notebook_metadata(&self, path: &str) -> Result<Value, WorkspaceError> {
        match self
            .api_get("/api/2.0/workspace/get-status", &[("path", path.to_string())])
            .await
        {
            Ok(data) => Ok(data),
            Err(e @ WorkspaceError::Fatal { .. }) => Err(e),
            Err(e) => {
                self.record_failure(path, "get-status", e.to_string());
                Ok(Value::Null)
            }
        }
    }

    /// All jobs, paginated 25 per page.
    pub async fn get_all_jobs(&self) -> Result<Vec<Value>, WorkspaceError> {
        let mut all_jobs = Vec::new();
        let mut offset: i64 = 0;
        let limit: i64 = 25;
        loop {
            let result = self
                .api_get(
                    "/api/2.1/jobs/list",
                    &[
                        ("limit", limit.to_string()),
                        ("offset", offset.to_string()),
                        ("expand_tasks", "true".to_string()),
                    ],
                )
                .await;
            match result {
                Ok(data) => {
                    let jobs = data["jobs"].as_array().cloned().unwrap_or_default();
                    all_jobs.extend(jobs);
                    if !data["has_more"].as_bool().unwrap_or(false) {
                        break;
                    }
                    offset += limit;
                }
                Err(e @ WorkspaceError::Fatal { .. }) => return Err(e),
                Err(e) => {
                    self.record_failure(
                        &format!("jobs/offset={}", offset),
                        "list_jobs",
                        e.to_string(),
                    );
                    break;
                }
            }
        }
        tracing::info!("Fetched {} jobs total", all_jobs.len());
        Ok(all_jobs)
    }

    /// Recent runs for one job (newest first, limit 25).
    pub async fn get_job_runs(&self, job_id: i64, limit: usize) -> Vec<Value> {
        match self
            .api_get(
                "/api/2.1/jobs/runs/list",
                &[("job_id", job_id.to_string()), ("limit", limit.to_string())],
            )
            .await
        {
            Ok(data) => data["runs"].as_array().cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let secs = RETRY_BASE_SECS.saturating_mul(1 << (attempt.saturating_sub(1)));
    Duration::from_secs(secs.min(RETRY_MAX_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn failures_flow_through_the_channel() {
        let (client, mut rx) = WorkspaceClient::new("https://ws.example.com", "tok").unwrap();
        client.record_failure("/Workspace/x", "list", "boom".to_string());
        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.operation, "list");
        assert_eq!(client.failure_count(), 1);
    }
}
