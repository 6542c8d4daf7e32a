//! Scene pipeline orchestration.
//!
//! The [`Pipeline`] owns the run state and is the only thing that mutates
//! it. Each scene moves through
//!
//! ```text
//! pending -> resolving -> resolved -> reconciling -> reconciled
//!                 \                        \
//!                  -> failed | cancelled    -> failed
//! ```
//!
//! and the state is persisted after every batch of transitions, so an
//! interrupted run resumes from the last settled stage. Scene failures are
//! recorded and never stop sibling scenes; compositing runs once every
//! scene is reconciled, or on the reconciled subset with `allow_partial`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use mvgen_audio_ai::{place_cues, SrtFileTranscriber, Transcriber, TranscriptionSegment};
use mvgen_clip_resolver::{ClipResolver, ResolveAction, ResolverOptions, SceneResolution};
use mvgen_common::{CancelToken, MvgenError, MvgenResult};
use mvgen_processing_core::{DurationReconciler, TimelineLayout};
use mvgen_project_model::{
    resolve_relative, Manifest, ReconciledClip, RunState, RunStateError, SceneSource,
    SceneStage, SubtitleSource,
};
use mvgen_render_engine::{
    export_composition, AudioInput, Compositor, ExportJob, ProgressCallback,
};

use crate::options::{Collaborators, PipelineOptions};
use crate::report::{PipelineReport, SceneStatus};

/// Drives a manifest from scenes to a finished video.
pub struct Pipeline {
    manifest: Manifest,
    manifest_dir: PathBuf,
    options: PipelineOptions,
    collaborators: Collaborators,
    resolver: Arc<ClipResolver>,
    reconciler: DurationReconciler,
    state: RunState,
    composed_secs: Option<f64>,
}

impl Pipeline {
    /// Load (or start) the run state for `manifest` and prepare the stages.
    ///
    /// Persisted progress is brought in line with the manifest: edited scenes
    /// start over, and settled scenes whose asset has disappeared are reset.
    pub fn new(
        mut manifest: Manifest,
        manifest_dir: impl Into<PathBuf>,
        options: PipelineOptions,
        collaborators: Collaborators,
    ) -> MvgenResult<Self> {
        let manifest_dir = manifest_dir.into();
        if let Some(format) = options.format {
            manifest.output.format = format;
        }
        if let Some(quality) = options.quality {
            manifest.output.quality = quality;
        }

        let (state, sync) =
            RunState::load_or_new(&options.state_path, &manifest).map_err(state_error)?;
        if !sync.is_empty() {
            info!(
                added = sync.added.len(),
                removed = sync.removed.len(),
                invalidated = ?sync.invalidated,
                recovered = ?sync.recovered,
                output_changed = sync.output_changed,
                "Run state synced with manifest"
            );
        }

        let resolver = ClipResolver::new(
            collaborators.generation.clone(),
            Arc::clone(&collaborators.prober),
            options.poller.clone(),
            ResolverOptions {
                concurrency: options.concurrency.max(1),
                skip_existing: options.skip_existing,
                base_dir: manifest_dir.clone(),
                clips_dir: options.clips_dir.clone(),
                aspect_ratio: manifest.output.aspect_ratio,
                resolution: manifest.output.resolution,
            },
        );

        let mut pipeline = Self {
            reconciler: DurationReconciler::new(manifest.output.frame_rate),
            manifest,
            manifest_dir,
            options,
            collaborators,
            resolver: Arc::new(resolver),
            state,
            composed_secs: None,
        };
        pipeline.reset_missing_assets()?;
        Ok(pipeline)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Where the final video is written.
    pub fn output_path(&self) -> PathBuf {
        self.options.output_path.clone().unwrap_or_else(|| {
            self.options.workspace_dir.join(format!(
                "{}.{}",
                slug(&self.manifest.project_name),
                self.manifest.output.format.extension()
            ))
        })
    }

    /// Resolve, reconcile and composite.
    ///
    /// Scene failures end up in the report. Compositor failures
    /// (`TransitionOverlap`, `AudioSync`, `Encode`) are returned as errors
    /// after being recorded in the run state; no output is written.
    pub async fn run(
        &mut self,
        cancel: &CancelToken,
        progress: Option<ProgressCallback>,
    ) -> MvgenResult<PipelineReport> {
        info!(
            project = %self.manifest.project_name,
            scenes = self.manifest.scenes.len(),
            generated = self.manifest.generation_count(),
            "Starting pipeline run"
        );

        self.resolve_outstanding(cancel, true).await?;
        self.reconcile()?;

        if cancel.is_cancelled() {
            warn!("Run cancelled; skipping composition");
            return Ok(self.report());
        }

        let counts = self.state.counts();
        let ready = self.state.all_reconciled()
            || (self.options.allow_partial && counts.reconciled > 0);
        if ready {
            self.compose(progress).await?;
        } else {
            warn!(
                reconciled = counts.reconciled,
                failed = counts.failed,
                pending = counts.pending,
                "Not every scene is reconciled; skipping composition"
            );
        }
        Ok(self.report())
    }

    /// Resolve every scene that has no usable clip yet.
    pub async fn resolve(&mut self, cancel: &CancelToken) -> MvgenResult<()> {
        self.resolve_outstanding(cancel, false).await
    }

    /// What [`Pipeline::resolve`] would do, without doing it.
    pub fn plan_resolution(&self) -> Vec<(String, ResolveAction)> {
        self.outstanding()
            .into_iter()
            .filter_map(|id| self.manifest.scene(&id))
            .map(|scene| (scene.id.clone(), self.resolver.plan(scene)))
            .collect()
    }

    /// Reconcile every resolved scene to its declared duration.
    pub fn reconcile(&mut self) -> MvgenResult<()> {
        let ids: Vec<String> = self
            .state
            .needs_reconciliation()
            .into_iter()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        for id in &ids {
            self.reconcile_scene(id)?;
        }
        self.persist()
    }

    /// Composite the reconciled scenes and export the final video.
    ///
    /// Any previously recorded output is forgotten first, so a failed export
    /// never reports an older video as this run's result.
    pub async fn compose(&mut self, progress: Option<ProgressCallback>) -> MvgenResult<PathBuf> {
        self.composed_secs = None;
        if self.state.output_path.is_some() {
            self.state.clear_output();
            self.persist()?;
        }
        match self.compose_inner(progress).await {
            Ok(path) => {
                self.state.set_output(path.clone());
                self.persist()?;
                Ok(path)
            }
            Err(e) => {
                warn!(error = %e, "Composition failed");
                self.state.push_error(e.to_string());
                self.persist()?;
                Err(e)
            }
        }
    }

    /// Per-scene state, manifest order.
    pub fn status(&self) -> Vec<SceneStatus> {
        self.manifest
            .scenes
            .iter()
            .filter_map(|scene| {
                let record = self.state.record(&scene.id)?;
                Some(SceneStatus {
                    scene_id: scene.id.clone(),
                    stage: record.stage,
                    source: match scene.source {
                        SceneSource::Generate(_) => "generate",
                        SceneSource::File(_) => "file",
                    },
                    target_secs: scene.duration_secs,
                    native_secs: record.media.as_ref().map(|m| m.duration_secs),
                    plan: record.plan.as_ref().map(|p| p.label()),
                    attempts: record.attempts,
                    asset_path: record.asset_path.clone(),
                    error: record.error.clone(),
                })
            })
            .collect()
    }

    /// Summary of the current run state.
    pub fn report(&self) -> PipelineReport {
        PipelineReport::from_state(&self.state, self.composed_secs)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn outstanding(&self) -> Vec<String> {
        let ids = self.state.needs_resolution().into_iter().map(str::to_string);
        match self.options.limit {
            Some(limit) => ids.take(limit).collect(),
            None => ids.collect(),
        }
    }

    async fn resolve_outstanding(
        &mut self,
        cancel: &CancelToken,
        reconcile_eagerly: bool,
    ) -> MvgenResult<()> {
        let ids = self.outstanding();
        if ids.is_empty() {
            debug!("No scenes need resolution");
            return Ok(());
        }

        if cancel.is_cancelled() {
            for id in &ids {
                if self.state.stage(id) == Some(SceneStage::Pending) {
                    self.state.mark_cancelled(id).map_err(state_error)?;
                }
            }
            return self.persist();
        }

        let mut batch = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some((index, scene)) = self
                .manifest
                .scenes
                .iter()
                .enumerate()
                .find(|(_, s)| &s.id == id)
            else {
                continue;
            };
            self.state
                .transition(id, SceneStage::Resolving)
                .map_err(state_error)?;
            batch.push((index, scene.clone()));
        }
        self.persist()?;

        info!(
            scenes = batch.len(),
            concurrency = self.options.concurrency,
            "Resolving scenes"
        );

        let mut set = self.resolver.spawn_all(batch, cancel);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(resolution) => {
                    let scene_id = resolution.scene_id.clone();
                    self.apply_resolution(resolution)?;
                    if reconcile_eagerly && self.state.stage(&scene_id) == Some(SceneStage::Resolved)
                    {
                        self.reconcile_scene(&scene_id)?;
                    }
                    self.persist()?;
                }
                Err(e) => warn!(error = %e, "Resolver task panicked"),
            }
        }

        // A task that died without reporting leaves its scene in flight.
        for id in &ids {
            if self.state.stage(id) == Some(SceneStage::Resolving) {
                self.state
                    .mark_failed(id, "resolver task aborted")
                    .map_err(state_error)?;
            }
        }
        self.persist()
    }

    fn apply_resolution(&mut self, resolution: SceneResolution) -> MvgenResult<()> {
        let id = resolution.scene_id;
        match resolution.result {
            Ok(clip) => match clip.media {
                Some(media) => {
                    info!(
                        scene = %id,
                        origin = ?clip.origin,
                        duration_secs = media.duration_secs,
                        "Scene resolved"
                    );
                    self.state
                        .mark_resolved(&id, clip.path, media)
                        .map_err(state_error)
                }
                None => self
                    .state
                    .mark_failed(&id, "resolved clip carries no media information")
                    .map_err(state_error),
            },
            Err(MvgenError::Cancelled { .. }) => {
                info!(scene = %id, "Scene cancelled");
                self.state.mark_cancelled(&id).map_err(state_error)
            }
            Err(e) => {
                warn!(scene = %id, error = %e, "Scene failed to resolve");
                self.state.mark_failed(&id, e.to_string()).map_err(state_error)
            }
        }
    }

    fn reconcile_scene(&mut self, id: &str) -> MvgenResult<()> {
        let Some(scene) = self.manifest.scene(id) else {
            return Ok(());
        };
        let (target, options) = (scene.duration_secs, scene.reconcile);
        let Some(media) = self.state.record(id).and_then(|r| r.media.clone()) else {
            return Err(MvgenError::state(format!(
                "scene `{id}` has no probed media to reconcile"
            )));
        };

        self.state
            .transition(id, SceneStage::Reconciling)
            .map_err(state_error)?;
        match self.reconciler.plan(id, &media, target, options) {
            Ok(plan) => {
                info!(
                    scene = %id,
                    plan = plan.label(),
                    native_secs = media.duration_secs,
                    target_secs = plan.duration_secs(),
                    "Scene reconciled"
                );
                self.state.mark_reconciled(id, plan).map_err(state_error)
            }
            Err(e) => {
                let e = MvgenError::from(e);
                warn!(scene = %id, error = %e, "Scene failed to reconcile");
                self.state.mark_failed(id, e.to_string()).map_err(state_error)
            }
        }
    }

    async fn compose_inner(&mut self, progress: Option<ProgressCallback>) -> MvgenResult<PathBuf> {
        let clips = self.reconciled_clips();
        let missing: Vec<&str> = self
            .state
            .scenes
            .iter()
            .filter(|r| r.stage != SceneStage::Reconciled)
            .map(|r| r.scene_id.as_str())
            .collect();
        if clips.is_empty() {
            return Err(MvgenError::state("no reconciled scenes to composite"));
        }
        if !missing.is_empty() {
            if !self.options.allow_partial {
                return Err(MvgenError::state(format!(
                    "{} scene(s) not reconciled: {}",
                    missing.len(),
                    missing.join(", ")
                )));
            }
            warn!(missing = ?missing, "Compositing partial timeline");
        }

        // Transition overlaps surface here, before any transcription work.
        let layout = TimelineLayout::build(
            &self.manifest.scenes,
            &clips,
            self.manifest.output.frame_rate,
        )?;

        let audio = self.audio_input().await?;
        let cues = self
            .subtitle_cues(audio.as_ref(), layout.total_secs)
            .await?;

        let plan = Compositor::new(&self.manifest).plan(&clips, audio.as_ref(), &cues)?;
        let total_secs = plan.total_secs();
        info!(
            scenes = clips.len(),
            total_secs,
            cues = plan.cues.len(),
            "Composition planned"
        );

        let job = ExportJob {
            plan,
            output_path: self.output_path(),
            subtitle_sidecar: self.options.subtitle_sidecar,
        };
        let output = export_composition(job, (self.collaborators.renderer)(), progress).await?;
        self.composed_secs = Some(total_secs);
        Ok(output)
    }

    /// Reconciled scenes as compositor inputs, manifest order.
    fn reconciled_clips(&self) -> Vec<ReconciledClip> {
        self.manifest
            .scenes
            .iter()
            .filter_map(|scene| {
                let record = self.state.record(&scene.id)?;
                if record.stage != SceneStage::Reconciled {
                    return None;
                }
                Some(ReconciledClip {
                    scene_id: scene.id.clone(),
                    path: record.asset_path.clone()?,
                    media: record.media.clone()?,
                    target_secs: scene.duration_secs,
                    plan: record.plan.clone()?,
                })
            })
            .collect()
    }

    async fn audio_input(&self) -> MvgenResult<Option<AudioInput>> {
        let Some(track) = &self.manifest.audio else {
            return Ok(None);
        };
        let path = resolve_relative(&self.manifest_dir, &track.path);
        if !path.is_file() {
            return Err(MvgenError::audio_sync(format!(
                "audio track not found: {}",
                path.display()
            )));
        }
        let duration = self
            .collaborators
            .prober
            .probe_duration(&path)
            .await
            .map_err(|e| MvgenError::audio_sync(format!("cannot measure audio track: {e}")))?;
        debug!(path = %path.display(), duration_secs = duration, "Audio track measured");
        Ok(Some(AudioInput {
            path,
            duration_secs: Some(duration),
        }))
    }

    async fn subtitle_cues(
        &self,
        audio: Option<&AudioInput>,
        total_secs: f64,
    ) -> MvgenResult<Vec<TranscriptionSegment>> {
        let Some(settings) = &self.manifest.subtitles else {
            return Ok(Vec::new());
        };

        let (transcriber, input): (Arc<dyn Transcriber>, PathBuf) = match &settings.source {
            SubtitleSource::File { path } => {
                let path = resolve_relative(&self.manifest_dir, path);
                let input = audio.map(|a| a.path.clone()).unwrap_or_else(|| path.clone());
                let transcriber: Arc<dyn Transcriber> = Arc::new(SrtFileTranscriber::new(path));
                (transcriber, input)
            }
            SubtitleSource::Audio => {
                let audio = audio.ok_or_else(|| {
                    MvgenError::audio_sync(
                        "subtitles are sourced from the audio track but no audio track is configured",
                    )
                })?;
                let transcriber = self.collaborators.transcriber.clone().ok_or_else(|| {
                    MvgenError::audio_sync("subtitles need a transcription service")
                })?;
                (transcriber, audio.path.clone())
            }
        };

        let result = transcriber.transcribe(&input).await.map_err(|e| match e {
            MvgenError::AudioSync { .. } => e,
            e => MvgenError::audio_sync(format!(
                "{} transcription failed: {e}",
                transcriber.name()
            )),
        })?;
        let loop_audio = self.manifest.audio.as_ref().map_or(true, |a| a.loop_audio);
        let cues = place_cues(
            &result.segments,
            audio.and_then(|a| a.duration_secs),
            total_secs,
            loop_audio,
        );
        info!(
            transcriber = transcriber.name(),
            segments = result.segments.len(),
            cues = cues.len(),
            "Subtitle cues placed"
        );
        Ok(cues)
    }

    // -----------------------------------------------------------------------
    // State bookkeeping
    // -----------------------------------------------------------------------

    /// Reset settled scenes whose asset is gone, so they resolve again.
    fn reset_missing_assets(&mut self) -> MvgenResult<()> {
        let stale: Vec<String> = self
            .state
            .scenes
            .iter()
            .filter(|r| {
                matches!(r.stage, SceneStage::Resolved | SceneStage::Reconciled)
                    || r.failed_during == Some(SceneStage::Reconciling)
            })
            .filter(|r| r.asset_path.as_deref().map_or(true, |p| !p.is_file()))
            .map(|r| r.scene_id.clone())
            .collect();
        for id in stale {
            warn!(scene = %id, "Resolved asset is missing; scene will be resolved again");
            self.state.reset(&id).map_err(state_error)?;
        }
        Ok(())
    }

    fn persist(&self) -> MvgenResult<()> {
        self.state
            .save(&self.options.state_path)
            .map_err(state_error)
    }
}

fn state_error(e: RunStateError) -> MvgenError {
    MvgenError::state(e.to_string())
}

/// Lower-case, dash-separated file name for a project.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        "output".to_string()
    } else {
        out
    }
}

/// Manifest directory for a manifest path.
pub fn manifest_dir(manifest_path: &Path) -> PathBuf {
    match manifest_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
