//! Timed transcription of the music track.
//!
//! A [`Transcriber`] turns an audio file into timed text segments. Two
//! implementations ship: [`HttpTranscriber`] uploads the audio to a
//! transcription service, and [`SrtFileTranscriber`] reads pre-timed lyrics
//! from an SRT file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};

use mvgen_common::{with_retry, MvgenError, MvgenResult, RetryPolicy, TranscriptionConfig};

use crate::subtitles::parse_srt;

/// A single transcribed segment with timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    /// Start time in seconds.
    #[serde(alias = "start")]
    pub start_secs: f64,
    /// End time in seconds.
    #[serde(alias = "end")]
    pub end_secs: f64,
    /// Transcribed text.
    pub text: String,
    /// Confidence score [0.0, 1.0] (if available).
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl TranscriptionSegment {
    pub fn new(start_secs: f64, end_secs: f64, text: impl Into<String>) -> Self {
        Self {
            start_secs,
            end_secs,
            text: text.into(),
            confidence: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

/// Result of a transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Detected language.
    #[serde(default)]
    pub language: String,
    /// Transcribed segments, ordered by start time.
    pub segments: Vec<TranscriptionSegment>,
    /// Total duration processed.
    #[serde(default)]
    pub duration_secs: f64,
    /// Processing time in seconds.
    #[serde(default)]
    pub processing_time_secs: f64,
}

impl TranscriptionResult {
    /// Sort segments by start and drop blank or inverted ones.
    fn normalized(mut self) -> Self {
        self.segments
            .retain(|s| !s.text.trim().is_empty() && s.end_secs > s.start_secs);
        for segment in &mut self.segments {
            segment.text = segment.text.trim().to_string();
        }
        self.segments
            .sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
        self
    }
}

/// Speech-to-text collaborator.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe `audio`. Segments come back ordered by start time.
    async fn transcribe(&self, audio: &Path) -> MvgenResult<TranscriptionResult>;
}

/// Uploads audio to `POST {base}/v1/transcriptions` as multipart form data.
///
/// The service answers with
/// `{ "language", "duration_secs", "segments": [{ "start_secs", "end_secs", "text" }] }`.
pub struct HttpTranscriber {
    client: Client,
    base_url: String,
    language: Option<String>,
    retry: RetryPolicy,
}

impl HttpTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        language: Option<String>,
    ) -> MvgenResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MvgenError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            language,
            retry: RetryPolicy::default(),
        })
    }

    /// Build from configuration; `None` when no service is configured.
    pub fn from_config(config: &TranscriptionConfig) -> MvgenResult<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| {
                Self::new(
                    url,
                    Duration::from_secs(config.request_timeout_secs),
                    config.language.clone(),
                )
            })
            .transpose()
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn upload(&self, audio: &Path, bytes: &[u8]) -> Result<TranscriptionResult, UploadError> {
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| UploadError::Permanent(e.to_string()))?;
        let mut form = multipart::Form::new().part("file", part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/transcriptions", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    UploadError::Transient(e.to_string())
                } else {
                    UploadError::Permanent(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", body.trim());
            return Err(
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    UploadError::Transient(message)
                } else {
                    UploadError::Permanent(message)
                },
            );
        }

        response
            .json()
            .await
            .map_err(|e| UploadError::Permanent(format!("bad transcription response: {e}")))
    }
}

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

#[async_trait::async_trait]
impl Transcriber for HttpTranscriber {
    fn name(&self) -> &str {
        "http"
    }

    async fn transcribe(&self, audio: &Path) -> MvgenResult<TranscriptionResult> {
        tracing::info!(path = %audio.display(), service = %self.base_url, "Starting transcription");

        if !audio.exists() {
            return Err(MvgenError::audio_sync(format!(
                "audio file not found: {}",
                audio.display()
            )));
        }
        let bytes = tokio::fs::read(audio).await?;

        let started = Instant::now();
        let mut result = with_retry(
            &self.retry,
            "transcribe",
            |e: &UploadError| matches!(e, UploadError::Transient(_)),
            || self.upload(audio, &bytes),
        )
        .await
        .map_err(|e| MvgenError::audio_sync(format!("transcription failed: {e}")))?;
        result.processing_time_secs = started.elapsed().as_secs_f64();

        let result = result.normalized();
        tracing::info!(
            segments = result.segments.len(),
            language = %result.language,
            processing_time_secs = result.processing_time_secs,
            "Transcription complete"
        );
        Ok(result)
    }
}

/// Reads cues from an existing SRT file instead of transcribing.
#[derive(Debug, Clone)]
pub struct SrtFileTranscriber {
    path: PathBuf,
}

impl SrtFileTranscriber {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Transcriber for SrtFileTranscriber {
    fn name(&self) -> &str {
        "srt-file"
    }

    async fn transcribe(&self, _audio: &Path) -> MvgenResult<TranscriptionResult> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MvgenError::validation(
                "subtitles.source.path",
                format!("cannot read {}: {e}", self.path.display()),
            )
        })?;
        let segments = parse_srt(&content)
            .map_err(|e| MvgenError::validation("subtitles.source.path", e.to_string()))?;
        let duration_secs = segments.iter().map(|s| s.end_secs).fold(0.0, f64::max);

        tracing::debug!(path = %self.path.display(), cues = segments.len(), "Loaded subtitle file");
        Ok(TranscriptionResult {
            language: String::new(),
            segments,
            duration_secs,
            processing_time_secs: 0.0,
        }
        .normalized())
    }
}
