//! Clip generation backends.

use std::path::Path;

use serde::{Deserialize, Serialize};

use mvgen_project_model::GenerationParams;

pub mod http;

pub use http::HttpGenerationBackend;

/// What the backend is asked to produce for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub scene_id: String,
    pub prompt: String,
    pub duration_secs: f64,
    /// `W:H`
    pub aspect_ratio: String,
    /// `WxH`
    pub resolution: String,
    #[serde(default)]
    pub params: GenerationParams,
}

/// Backend-issued handle for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub scene_id: String,
}

/// A finished asset, ready to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    /// Absolute URL, or a path relative to the backend base URL.
    pub location: String,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending { progress: Option<f64> },
    Ready(GeneratedAsset),
    Failed { reason: String },
}

/// Backend call failures, split by whether retrying can help.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("backend error: {0}")]
    Permanent(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Abstract interface for an asynchronous clip generation service.
///
/// Implementations must be shareable across resolver tasks.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Submit a generation job.
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, BackendError>;

    /// Query the status of a submitted job.
    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError>;

    /// Download a finished asset to `dest`.
    async fn fetch(&self, asset: &GeneratedAsset, dest: &Path) -> Result<(), BackendError>;
}
