//! Pipeline settings and collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mvgen_audio_ai::Transcriber;
use mvgen_clip_resolver::{GenerationBackend, JobPoller, MediaProber};
use mvgen_common::AppConfig;
use mvgen_project_model::{OutputFormat, Quality};
use mvgen_render_engine::RenderBackend;

/// Per-invocation pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum number of scenes resolving at once.
    pub concurrency: usize,

    /// Reuse previously generated clips.
    pub skip_existing: bool,

    /// Composite the reconciled subset when some scenes failed.
    pub allow_partial: bool,

    /// Resolve at most this many outstanding scenes per invocation.
    pub limit: Option<usize>,

    /// Root for generated artifacts.
    pub workspace_dir: PathBuf,

    /// Generated clip directory.
    pub clips_dir: PathBuf,

    /// Persisted run-state file.
    pub state_path: PathBuf,

    /// Final output file. Defaults to `<workspace>/<project>.<ext>`.
    pub output_path: Option<PathBuf>,

    /// Overrides for the manifest's output settings.
    pub format: Option<OutputFormat>,
    pub quality: Option<Quality>,

    /// Write an `.srt` next to the output when subtitles are burned in.
    pub subtitle_sidecar: bool,

    /// Generation job polling.
    pub poller: JobPoller,
}

impl PipelineOptions {
    /// Options for a manifest living in `manifest_dir`.
    ///
    /// Clips and run state go under the configured workspace directory, or
    /// next to the manifest when none is configured.
    pub fn from_config(config: &AppConfig, manifest_dir: &Path) -> Self {
        let workspace = config
            .workspace_dir
            .clone()
            .unwrap_or_else(|| manifest_dir.to_path_buf());
        Self {
            concurrency: config.pipeline.concurrency.max(1),
            skip_existing: config.pipeline.skip_existing,
            allow_partial: config.pipeline.allow_partial,
            limit: None,
            workspace_dir: workspace.clone(),
            clips_dir: workspace.join(&config.pipeline.clips_dir),
            state_path: workspace.join(&config.pipeline.state_file),
            output_path: None,
            format: None,
            quality: None,
            subtitle_sidecar: config.render.subtitle_sidecar,
            poller: JobPoller::from_config(&config.generation),
        }
    }
}

/// Builds a fresh render backend for each export.
pub type RendererFactory = Box<dyn Fn() -> Box<dyn RenderBackend> + Send + Sync>;

/// External collaborators the pipeline drives.
pub struct Collaborators {
    /// Clip generation service. Generation scenes fail without one.
    pub generation: Option<Arc<dyn GenerationBackend>>,

    /// Media measurement.
    pub prober: Arc<dyn MediaProber>,

    /// Speech-to-text for audio-sourced subtitles.
    pub transcriber: Option<Arc<dyn Transcriber>>,

    /// Encoder used by the export stage.
    pub renderer: RendererFactory,
}
