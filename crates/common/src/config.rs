//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where clips, run state and outputs are written when a
    /// manifest does not sit in a writable directory of its own.
    pub workspace_dir: Option<PathBuf>,

    /// Pipeline defaults.
    pub pipeline: PipelineDefaults,

    /// Clip generation backend.
    pub generation: GenerationConfig,

    /// Transcription backend.
    pub transcription: TranscriptionConfig,

    /// Default render settings.
    pub render: RenderDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    /// Maximum number of scenes resolving at the same time.
    pub concurrency: usize,

    /// Reuse `<clips_dir>/<scene_id>.mp4` instead of regenerating.
    pub skip_existing: bool,

    /// Composite the reconciled subset even when some scenes failed.
    pub allow_partial: bool,

    /// Generated clip directory, relative to the workspace.
    pub clips_dir: PathBuf,

    /// Run-state file, relative to the workspace.
    pub state_file: PathBuf,
}

/// Clip generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the generation service. `None` disables generation.
    pub base_url: Option<String>,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// First delay between status polls.
    pub poll_interval_secs: f64,

    /// Upper bound for the poll delay after backoff.
    pub max_poll_interval_secs: f64,

    /// Give up on a job after this long.
    pub max_wait_secs: f64,

    /// Retries for transient transport errors.
    pub max_retries: u32,

    /// Base delay for transient-error backoff.
    pub retry_base_delay_secs: f64,
}

/// Transcription backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Base URL of the transcription service.
    pub base_url: Option<String>,

    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Language hint (ISO 639-1).
    pub language: Option<String>,
}

/// Default render parameters, used when the manifest leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Path to the ffmpeg binary. Looked up on `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe binary. Looked up on `PATH` when unset.
    pub ffprobe_path: Option<PathBuf>,

    /// Write an `.srt` next to the output when subtitles are burned in.
    /// Off by default: the video is the only artifact.
    pub subtitle_sidecar: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mvgen=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            pipeline: PipelineDefaults::default(),
            generation: GenerationConfig::default(),
            transcription: TranscriptionConfig::default(),
            render: RenderDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            concurrency: 3,
            skip_existing: false,
            allow_partial: false,
            clips_dir: PathBuf::from("clips"),
            state_file: PathBuf::from(".mvgen").join("run-state.json"),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 60,
            poll_interval_secs: 10.0,
            max_poll_interval_secs: 60.0,
            max_wait_secs: 600.0,
            max_retries: 3,
            retry_base_delay_secs: 2.0,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 300,
            language: None,
        }
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            subtitle_sidecar: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl GenerationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.max_poll_interval_secs.max(self.poll_interval_secs.max(0.0)))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_wait_secs.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        // A missing .env is the common case.
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(parsed) => config = parsed,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Apply `MVGEN_*` overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MVGEN_WORKSPACE").filter(|v| !v.is_empty()) {
            self.workspace_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("MVGEN_GENERATION_URL").filter(|v| !v.is_empty()) {
            self.generation.base_url = Some(url);
        }
        if let Some(url) = lookup("MVGEN_TRANSCRIPTION_URL").filter(|v| !v.is_empty()) {
            self.transcription.base_url = Some(url);
        }
        match lookup("MVGEN_CONCURRENCY").map(|v| v.parse::<usize>()) {
            Some(Ok(n)) if n > 0 => self.pipeline.concurrency = n,
            Some(_) => tracing::warn!("Ignoring invalid MVGEN_CONCURRENCY"),
            None => {}
        }
        if let Some(level) = lookup("MVGEN_LOG").filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("mvgen").join("config.json")
}
