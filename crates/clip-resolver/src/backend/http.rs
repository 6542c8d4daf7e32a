//! Vendor-neutral REST generation backend.
//!
//! ```text
//! POST {base}/v1/generations          GenerationRequest  -> { "job_id" }
//! GET  {base}/v1/generations/{job_id}                    -> { "status", "progress", "asset_url", "error" }
//! GET  {asset_url}                                       -> media bytes
//! ```

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{
    BackendError, GeneratedAsset, GenerationBackend, GenerationRequest, JobHandle, JobStatus,
};

/// HTTP client for a generation service.
pub struct HttpGenerationBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    asset_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpGenerationBackend {
    /// Create a backend for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Permanent(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {status}: {}", body.trim());
        if is_transient_status(status) {
            Err(BackendError::Transient(message))
        } else {
            Err(BackendError::Permanent(message))
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn map_reqwest(e: reqwest::Error) -> BackendError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        BackendError::Transient(e.to_string())
    } else {
        BackendError::Permanent(e.to_string())
    }
}

/// Map a status payload onto [`JobStatus`].
fn interpret(body: StatusResponse) -> Result<JobStatus, BackendError> {
    match body.status.to_ascii_lowercase().as_str() {
        "pending" | "queued" | "running" | "processing" => Ok(JobStatus::Pending {
            progress: body.progress,
        }),
        "succeeded" | "completed" | "ready" => {
            let location = body.asset_url.ok_or_else(|| {
                BackendError::Permanent("job succeeded without an asset_url".to_string())
            })?;
            Ok(JobStatus::Ready(GeneratedAsset { location }))
        }
        "failed" | "error" | "cancelled" => Ok(JobStatus::Failed {
            reason: body
                .error
                .unwrap_or_else(|| format!("job {}", body.status)),
        }),
        other => Err(BackendError::Permanent(format!(
            "unknown job status `{other}`"
        ))),
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, BackendError> {
        let response = self
            .client
            .post(self.url("v1/generations"))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest)?;
        let body: SubmitResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Permanent(format!("bad submit response: {e}")))?;

        info!(scene = %request.scene_id, job_id = %body.job_id, "Generation job submitted");
        Ok(JobHandle {
            job_id: body.job_id,
            scene_id: request.scene_id.clone(),
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("v1/generations/{}", job.job_id)))
            .send()
            .await
            .map_err(map_reqwest)?;
        let body: StatusResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Permanent(format!("bad status response: {e}")))?;

        debug!(scene = %job.scene_id, job_id = %job.job_id, status = %body.status, "Polled job");
        interpret(body)
    }

    async fn fetch(&self, asset: &GeneratedAsset, dest: &Path) -> Result<(), BackendError> {
        let mut response = Self::check(
            self.client
                .get(self.url(&asset.location))
                .send()
                .await
                .map_err(map_reqwest)?,
        )
        .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(dest = %dest.display(), bytes, "Fetched generated asset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: &str) -> StatusResponse {
        StatusResponse {
            status: status.to_string(),
            progress: None,
            asset_url: None,
            error: None,
        }
    }

    #[test]
    fn test_interpret_pending_and_failed() {
        assert_eq!(
            interpret(status("running")).unwrap(),
            JobStatus::Pending { progress: None }
        );
        match interpret(StatusResponse {
            error: Some("content policy".to_string()),
            ..status("failed")
        })
        .unwrap()
        {
            JobStatus::Failed { reason } => assert_eq!(reason, "content policy"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_succeeded_without_asset_is_an_error() {
        assert!(interpret(status("succeeded")).is_err());
        assert!(interpret(status("exploded")).is_err());
    }

    #[test]
    fn test_relative_asset_urls_join_base() {
        let backend =
            HttpGenerationBackend::new("http://localhost:9000/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.url("/files/a.mp4"),
            "http://localhost:9000/files/a.mp4"
        );
        assert_eq!(backend.url("https://cdn/x.mp4"), "https://cdn/x.mp4");
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }
}
