//! Scene-to-clip resolution.
//!
//! File scenes are checked and probed. Generation scenes are submitted to
//! the backend, polled to completion, fetched into the clips directory, and
//! probed. With `skip_existing`, a previously fetched `<clips_dir>/<id>.mp4`
//! short-circuits generation entirely.
//!
//! Up to `concurrency` scenes resolve at once. After cancellation no new
//! job is submitted, and in-flight polls are abandoned at their next
//! suspension point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use mvgen_common::{with_retry, CancelToken, MvgenError, MvgenResult};
use mvgen_project_model::{
    resolve_relative, AspectRatio, ClipOrigin, GenerationDirective, MediaInfo, Resolution,
    ResolvedClip, Scene, SceneSource,
};

use crate::backend::{BackendError, GenerationBackend, GenerationRequest};
use crate::poller::{JobPoller, JobState};
use crate::probe::MediaProber;

/// Container of fetched generated clips.
pub const GENERATED_CLIP_EXTENSION: &str = "mp4";

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Maximum number of scenes resolving at once.
    pub concurrency: usize,

    /// Reuse previously generated clips.
    pub skip_existing: bool,

    /// Directory relative file references are resolved against.
    pub base_dir: PathBuf,

    /// Where generated clips are written.
    pub clips_dir: PathBuf,

    /// Output geometry forwarded to the backend.
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
}

/// What resolving a scene will do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveAction {
    /// Use a referenced file.
    UseFile { path: PathBuf, exists: bool },
    /// Reuse a previously generated clip.
    UseCached { path: PathBuf },
    /// Submit a generation job; the result lands at `path`.
    Generate { path: PathBuf },
}

/// Result of resolving one scene, tagged with its manifest position.
#[derive(Debug)]
pub struct SceneResolution {
    pub index: usize,
    pub scene_id: String,
    pub result: MvgenResult<ResolvedClip>,
}

/// Turns scenes into concrete, probed media files.
pub struct ClipResolver {
    backend: Option<Arc<dyn GenerationBackend>>,
    prober: Arc<dyn MediaProber>,
    poller: JobPoller,
    options: ResolverOptions,
    permits: Arc<Semaphore>,
}

impl ClipResolver {
    pub fn new(
        backend: Option<Arc<dyn GenerationBackend>>,
        prober: Arc<dyn MediaProber>,
        poller: JobPoller,
        options: ResolverOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        Self {
            backend,
            prober,
            poller,
            options,
            permits,
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn prober(&self) -> &Arc<dyn MediaProber> {
        &self.prober
    }

    /// Destination of a generated clip for `scene_id`.
    pub fn generated_path(&self, scene_id: &str) -> PathBuf {
        self.options
            .clips_dir
            .join(format!("{scene_id}.{GENERATED_CLIP_EXTENSION}"))
    }

    /// Decide how a scene would be resolved. Touches only the filesystem.
    pub fn plan(&self, scene: &Scene) -> ResolveAction {
        match &scene.source {
            SceneSource::File(file) => {
                let path = resolve_relative(&self.options.base_dir, &file.path);
                let exists = path.is_file();
                ResolveAction::UseFile { path, exists }
            }
            SceneSource::Generate(_) => {
                let path = self.generated_path(&scene.id);
                if self.options.skip_existing && path.is_file() {
                    ResolveAction::UseCached { path }
                } else {
                    ResolveAction::Generate { path }
                }
            }
        }
    }

    /// Resolve a single scene.
    pub async fn resolve(&self, scene: &Scene, cancel: &CancelToken) -> MvgenResult<ResolvedClip> {
        match &scene.source {
            SceneSource::File(file) => {
                let path = resolve_relative(&self.options.base_dir, &file.path);
                if !path.is_file() {
                    return Err(MvgenError::missing_asset(&scene.id, path));
                }
                let media = self.probe_clip(&path).await?;
                info!(
                    scene = %scene.id,
                    path = %path.display(),
                    duration_secs = media.duration_secs,
                    "Resolved file scene"
                );
                Ok(ResolvedClip::ready(&scene.id, path, ClipOrigin::File, media))
            }
            SceneSource::Generate(directive) => {
                if let ResolveAction::UseCached { path } = self.plan(scene) {
                    match self.probe_clip(&path).await {
                        Ok(media) => {
                            info!(scene = %scene.id, path = %path.display(), "Reusing existing clip");
                            return Ok(ResolvedClip::ready(
                                &scene.id,
                                path,
                                ClipOrigin::Cached,
                                media,
                            ));
                        }
                        Err(e) => {
                            warn!(scene = %scene.id, error = %e, "Existing clip unreadable, regenerating");
                        }
                    }
                }
                self.generate(scene, directive, cancel).await
            }
        }
    }

    async fn generate(
        &self,
        scene: &Scene,
        directive: &GenerationDirective,
        cancel: &CancelToken,
    ) -> MvgenResult<ResolvedClip> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            MvgenError::generation_failed(&scene.id, "no generation backend configured")
        })?;

        if cancel.is_cancelled() {
            return Err(MvgenError::cancelled(&scene.id));
        }

        let request = GenerationRequest {
            scene_id: scene.id.clone(),
            prompt: directive.prompt.clone(),
            duration_secs: scene.duration_secs,
            aspect_ratio: self.options.aspect_ratio.to_string(),
            resolution: self.options.resolution.to_string(),
            params: directive.params.clone(),
        };

        let transient = |e: &BackendError| e.is_transient();
        let job = tokio::select! {
            _ = cancel.cancelled() => return Err(MvgenError::cancelled(&scene.id)),
            r = with_retry(&self.poller.retry, "submit", transient, || backend.submit(&request)) => r,
        }
        .map_err(|e| MvgenError::generation_failed(&scene.id, e.to_string()))?;

        info!(
            scene = %scene.id,
            backend = backend.name(),
            job_id = %job.job_id,
            "Waiting for generation"
        );

        let asset = match self.poller.wait(backend.as_ref(), &job, cancel).await {
            JobState::Ready(asset) => asset,
            JobState::Failed(reason) => {
                return Err(MvgenError::generation_failed(&scene.id, reason))
            }
            JobState::TimedOut { waited } => {
                return Err(MvgenError::GenerationTimeout {
                    scene_id: scene.id.clone(),
                    waited_secs: waited.as_secs_f64(),
                })
            }
            JobState::Cancelled | JobState::Submitted | JobState::Polling { .. } => {
                return Err(MvgenError::cancelled(&scene.id))
            }
        };

        let dest = self.generated_path(&scene.id);
        let part = dest.with_extension(format!("{GENERATED_CLIP_EXTENSION}.part"));
        tokio::fs::create_dir_all(&self.options.clips_dir).await?;
        let fetched = tokio::select! {
            _ = cancel.cancelled() => Err(MvgenError::cancelled(&scene.id)),
            r = with_retry(&self.poller.retry, "fetch", transient, || backend.fetch(&asset, &part)) => {
                r.map_err(|e| MvgenError::generation_failed(&scene.id, format!("fetch failed: {e}")))
            }
        };
        if let Err(e) = fetched {
            remove_quietly(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, &dest).await?;

        let media = self.probe_clip(&dest).await?;
        info!(
            scene = %scene.id,
            path = %dest.display(),
            duration_secs = media.duration_secs,
            "Generated clip fetched"
        );
        Ok(ResolvedClip::ready(&scene.id, dest, ClipOrigin::Generated, media))
    }

    /// Spawn resolution of `scenes` on a [`JoinSet`], bounded by the
    /// concurrency limit. Results arrive in completion order; each carries
    /// its manifest index.
    pub fn spawn_all(
        self: &Arc<Self>,
        scenes: Vec<(usize, Scene)>,
        cancel: &CancelToken,
    ) -> JoinSet<SceneResolution> {
        let mut set = JoinSet::new();
        for (index, scene) in scenes {
            let resolver = Arc::clone(self);
            let cancel = cancel.clone();
            set.spawn(async move {
                let scene_id = scene.id.clone();
                let result = resolver.resolve_with_permit(&scene, &cancel).await;
                SceneResolution {
                    index,
                    scene_id,
                    result,
                }
            });
        }
        set
    }

    /// Resolve all scenes and return results in manifest order.
    pub async fn resolve_all(
        self: &Arc<Self>,
        scenes: &[Scene],
        cancel: &CancelToken,
    ) -> Vec<SceneResolution> {
        let indexed = scenes.iter().cloned().enumerate().collect();
        let mut set = self.spawn_all(indexed, cancel);
        let mut results = Vec::with_capacity(scenes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(resolution) => results.push(resolution),
                Err(e) => warn!(error = %e, "Resolver task panicked"),
            }
        }
        results.sort_by_key(|r| r.index);
        results
    }

    /// Probe a clip, rejecting media that reports no playable duration.
    async fn probe_clip(&self, path: &Path) -> MvgenResult<MediaInfo> {
        let media = self.prober.probe(path).await?;
        if !media.duration_secs.is_finite() || media.duration_secs <= 0.0 {
            return Err(MvgenError::probe(path, "clip reports zero duration"));
        }
        Ok(media)
    }

    async fn resolve_with_permit(
        &self,
        scene: &Scene,
        cancel: &CancelToken,
    ) -> MvgenResult<ResolvedClip> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(MvgenError::cancelled(&scene.id)),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| MvgenError::state("resolver semaphore closed"))?
            }
        };
        if cancel.is_cancelled() {
            return Err(MvgenError::cancelled(&scene.id));
        }
        self.resolve(scene, cancel).await
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}
