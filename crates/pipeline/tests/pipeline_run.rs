//! End-to-end pipeline runs against in-process collaborators.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mvgen_audio_ai::{Transcriber, TranscriptionResult};
use mvgen_clip_resolver::{
    BackendError, GeneratedAsset, GenerationBackend, GenerationRequest, JobHandle, JobPoller,
    JobStatus, MediaProber,
};
use mvgen_common::{CancelHandle, CancelToken, MvgenError, MvgenResult, RetryPolicy};
use mvgen_pipeline::{Collaborators, Pipeline, PipelineOptions};
use mvgen_project_model::{
    Manifest, MediaInfo, OutputFormat, Quality, ReconcilePlan, RunState, SceneStage,
};
use mvgen_render_engine::{CompositionPlan, ProgressCallback, RenderBackend};

/// Generation service that finishes every job on the first poll, except for
/// scenes listed in `failing` (rejected) or `stalled` (never finish).
#[derive(Default)]
struct StubBackend {
    submits: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    stalled: HashSet<String>,
}

impl StubBackend {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    fn stalled(ids: &[&str]) -> Self {
        Self {
            stalled: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, BackendError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(JobHandle {
            job_id: format!("job-{}", request.scene_id),
            scene_id: request.scene_id.clone(),
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError> {
        if self.stalled.contains(&job.scene_id) {
            return Ok(JobStatus::Pending { progress: Some(0.5) });
        }
        if self.failing.lock().unwrap().contains(&job.scene_id) {
            return Ok(JobStatus::Failed {
                reason: "content policy".to_string(),
            });
        }
        Ok(JobStatus::Ready(GeneratedAsset {
            location: job.job_id.clone(),
        }))
    }

    async fn fetch(&self, _asset: &GeneratedAsset, dest: &Path) -> Result<(), BackendError> {
        tokio::fs::write(dest, b"generated").await?;
        Ok(())
    }
}

/// Every clip is 3 s of 1080x1920; the music track is 10 s.
struct StubProber;

#[async_trait::async_trait]
impl MediaProber for StubProber {
    async fn probe(&self, _path: &Path) -> MvgenResult<MediaInfo> {
        Ok(MediaInfo {
            duration_secs: 3.0,
            width: 1080,
            height: 1920,
            fps: 30.0,
            has_audio: false,
            codec: "h264".to_string(),
        })
    }

    async fn probe_duration(&self, _path: &Path) -> MvgenResult<f64> {
        Ok(10.0)
    }
}

/// What the render backend was asked to do.
#[derive(Default)]
struct RenderLog {
    calls: AtomicUsize,
    scenes: Mutex<Vec<String>>,
    cues: AtomicUsize,
}

struct StubRenderer {
    log: Arc<RenderLog>,
    fail: bool,
}

impl RenderBackend for StubRenderer {
    fn render(
        &mut self,
        plan: &CompositionPlan,
        output: &Path,
        _progress: Option<&ProgressCallback>,
    ) -> MvgenResult<()> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        *self.log.scenes.lock().unwrap() = plan
            .layout
            .scene_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.log.cues.store(plan.cues.len(), Ordering::SeqCst);
        std::fs::write(output, b"video")?;
        if self.fail {
            return Err(MvgenError::encode("ffmpeg exited with status 1"));
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Transcription service that is never reachable.
struct OfflineTranscriber;

#[async_trait::async_trait]
impl Transcriber for OfflineTranscriber {
    fn name(&self) -> &str {
        "offline"
    }

    async fn transcribe(&self, _audio: &Path) -> MvgenResult<TranscriptionResult> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    backend: Arc<StubBackend>,
    render: Arc<RenderLog>,
}

impl Harness {
    fn new(backend: StubBackend) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            backend: Arc::new(backend),
            render: Arc::default(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            concurrency: 2,
            skip_existing: false,
            allow_partial: false,
            limit: None,
            workspace_dir: self.root().to_path_buf(),
            clips_dir: self.root().join("clips"),
            state_path: self.root().join(".mvgen/run-state.json"),
            output_path: Some(self.root().join("out/video.mp4")),
            format: None,
            quality: None,
            subtitle_sidecar: false,
            poller: JobPoller {
                interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(2),
                max_wait: Duration::from_secs(5),
                retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            },
        }
    }

    fn collaborators(&self, fail_render: bool) -> Collaborators {
        let log = Arc::clone(&self.render);
        Collaborators {
            generation: Some(Arc::clone(&self.backend) as Arc<dyn GenerationBackend>),
            prober: Arc::new(StubProber),
            transcriber: None,
            renderer: Box::new(move || {
                Box::new(StubRenderer {
                    log: Arc::clone(&log),
                    fail: fail_render,
                }) as Box<dyn RenderBackend>
            }),
        }
    }

    fn pipeline(&self, manifest: &Manifest, options: PipelineOptions) -> Pipeline {
        Pipeline::new(
            manifest.clone(),
            self.root(),
            options,
            self.collaborators(false),
        )
        .unwrap()
    }

    fn saved_state(&self) -> RunState {
        RunState::load(self.root().join(".mvgen/run-state.json")).unwrap()
    }

    fn output(&self) -> PathBuf {
        self.root().join("out/video.mp4")
    }

    fn render_calls(&self) -> usize {
        self.render.calls.load(Ordering::SeqCst)
    }
}

fn manifest(value: serde_json::Value) -> Manifest {
    Manifest::from_json_str(&value.to_string()).unwrap()
}

fn three_scenes() -> Manifest {
    manifest(serde_json::json!({
        "project_name": "Neon",
        "scenes": [
            { "id": "intro", "prompt": "neon city", "duration": 2.0 },
            { "id": "verse", "prompt": "rain on glass", "duration": 3.0 },
            { "id": "outro", "prompt": "sunrise", "duration": 4.0 }
        ]
    }))
}

#[tokio::test]
async fn test_full_run_reconciles_every_scene_and_exports() {
    let h = Harness::new(StubBackend::default());
    let mut pipeline = h.pipeline(&three_scenes(), h.options());

    let report = pipeline.run(&CancelToken::never(), None).await.unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.succeeded, vec!["intro", "verse", "outro"]);
    assert_eq!(report.output_path.as_deref(), Some(h.output().as_path()));
    assert!((report.total_duration_secs.unwrap() - 9.0).abs() < 1e-6);
    assert!(h.output().is_file());
    assert_eq!(h.backend.submits(), 3);
    assert_eq!(*h.render.scenes.lock().unwrap(), vec!["intro", "verse", "outro"]);

    let state = h.saved_state();
    assert!(state.all_reconciled());
    assert_eq!(state.output_path.as_deref(), Some(h.output().as_path()));
    assert!(matches!(
        state.record("intro").unwrap().plan,
        Some(ReconcilePlan::Trim { .. })
    ));
    assert!(matches!(
        state.record("outro").unwrap().plan,
        Some(ReconcilePlan::Loop { .. })
    ));
}

#[tokio::test]
async fn test_failed_scene_blocks_output_and_is_reported() {
    let h = Harness::new(StubBackend::failing(&["verse"]));
    let mut pipeline = h.pipeline(&three_scenes(), h.options());

    let report = pipeline.run(&CancelToken::never(), None).await.unwrap();

    assert_eq!(report.failed_ids(), vec!["verse"]);
    assert_eq!(report.failed[0].stage, SceneStage::Resolving);
    assert!(report.failed[0].error.contains("content policy"));
    assert_eq!(report.succeeded, vec!["intro", "outro"]);
    assert_eq!(report.output_path, None);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.render_calls(), 0);
    assert!(!h.output().exists());
}

#[tokio::test]
async fn test_resume_retries_only_unfinished_scenes() {
    let h = Harness::new(StubBackend::failing(&["verse"]));
    let manifest = three_scenes();

    let first = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();
    assert_eq!(first.failed_ids(), vec!["verse"]);
    assert_eq!(h.backend.submits(), 3);

    h.backend.heal();
    let mut resumed = h.pipeline(&manifest, h.options());
    assert_eq!(resumed.state().stage("intro"), Some(SceneStage::Reconciled));
    let second = resumed.run(&CancelToken::never(), None).await.unwrap();

    assert!(second.is_success(), "{second:?}");
    assert_eq!(h.backend.submits(), 4);
    assert_eq!(h.saved_state().record("verse").unwrap().attempts, 2);
}

#[tokio::test]
async fn test_allow_partial_composites_the_reconciled_subset() {
    let h = Harness::new(StubBackend::failing(&["verse"]));
    let mut options = h.options();
    options.allow_partial = true;
    let mut pipeline = h.pipeline(&three_scenes(), options);

    let report = pipeline.run(&CancelToken::never(), None).await.unwrap();

    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.failed_ids(), vec!["verse"]);
    assert!(h.output().is_file());
    assert_eq!(*h.render.scenes.lock().unwrap(), vec!["intro", "outro"]);
}

#[tokio::test]
async fn test_cancelled_run_submits_nothing_and_can_resume() {
    let h = Harness::new(StubBackend::default());
    let manifest = three_scenes();
    let (handle, token) = CancelHandle::new();
    handle.cancel();

    let report = h
        .pipeline(&manifest, h.options())
        .run(&token, None)
        .await
        .unwrap();

    assert_eq!(h.backend.submits(), 0);
    assert_eq!(report.failed.len(), 3);
    assert!(report
        .failed
        .iter()
        .all(|f| f.stage == SceneStage::Cancelled));
    let state = h.saved_state();
    assert!(state
        .scenes
        .iter()
        .all(|r| r.stage == SceneStage::Cancelled));

    let resumed = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();
    assert!(resumed.is_success());
    assert_eq!(h.backend.submits(), 3);
}

#[tokio::test]
async fn test_missing_file_scene_fails_alone() {
    let h = Harness::new(StubBackend::default());
    let manifest = manifest(serde_json::json!({
        "project_name": "Files",
        "scenes": [
            { "id": "shot", "file": "footage/missing.mp4", "duration": 2.0 },
            { "id": "gen", "prompt": "waves", "duration": 2.0 }
        ]
    }));

    let report = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert_eq!(report.failed_ids(), vec!["shot"]);
    assert!(report.failed[0].error.contains("missing asset"));
    assert_eq!(report.succeeded, vec!["gen"]);
}

#[tokio::test]
async fn test_transition_overlap_aborts_without_output() {
    let h = Harness::new(StubBackend::default());
    let manifest = manifest(serde_json::json!({
        "project_name": "Overlap",
        "scenes": [
            { "id": "a", "prompt": "sea", "duration": 1.0,
              "transition": { "kind": "crossfade", "duration": 1.5 } },
            { "id": "b", "prompt": "sky", "duration": 2.0 }
        ]
    }));

    let err = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, MvgenError::TransitionOverlap { .. }), "{err}");
    assert!(err.is_compositor_fatal());
    assert_eq!(h.render_calls(), 0);
    assert!(!h.output().exists());
    assert_eq!(h.saved_state().errors.len(), 1);
}

#[tokio::test]
async fn test_encode_failure_leaves_no_output() {
    let h = Harness::new(StubBackend::default());
    let mut pipeline = Pipeline::new(
        three_scenes(),
        h.root(),
        h.options(),
        h.collaborators(true),
    )
    .unwrap();

    let err = pipeline.run(&CancelToken::never(), None).await.unwrap_err();

    assert!(matches!(err, MvgenError::Encode { .. }));
    assert!(!h.output().exists());
    assert!(!h.root().join("out/video.partial.mp4").exists());
    assert!(pipeline.report().output_path.is_none());
    // Scene progress survives the failed export.
    assert!(h.saved_state().all_reconciled());
}

#[tokio::test]
async fn test_deleted_clip_is_resolved_again() {
    let h = Harness::new(StubBackend::default());
    let manifest = three_scenes();
    h.pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    std::fs::remove_file(h.root().join("clips/verse.mp4")).unwrap();
    let pipeline = h.pipeline(&manifest, h.options());

    assert_eq!(pipeline.state().stage("verse"), Some(SceneStage::Pending));
    assert_eq!(pipeline.state().stage("intro"), Some(SceneStage::Reconciled));
    let plan = pipeline.plan_resolution();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].0, "verse");
}

#[tokio::test]
async fn test_edited_scene_is_invalidated() {
    let h = Harness::new(StubBackend::default());
    h.pipeline(&three_scenes(), h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    let edited = manifest(serde_json::json!({
        "project_name": "Neon",
        "scenes": [
            { "id": "intro", "prompt": "neon city", "duration": 2.0 },
            { "id": "verse", "prompt": "rain on a window", "duration": 3.0 },
            { "id": "outro", "prompt": "sunrise", "duration": 4.0 }
        ]
    }));
    let report = h
        .pipeline(&edited, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(h.backend.submits(), 4);
}

#[tokio::test]
async fn test_skip_existing_reuses_generated_clips() {
    let h = Harness::new(StubBackend::default());
    std::fs::create_dir_all(h.root().join("clips")).unwrap();
    std::fs::write(h.root().join("clips/intro.mp4"), b"earlier").unwrap();
    let mut options = h.options();
    options.skip_existing = true;

    let report = h
        .pipeline(&three_scenes(), options)
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(h.backend.submits(), 2);
}

#[tokio::test]
async fn test_limit_resolves_first_outstanding_scenes() {
    let h = Harness::new(StubBackend::default());
    let mut options = h.options();
    options.limit = Some(2);
    let mut pipeline = h.pipeline(&three_scenes(), options);

    pipeline.resolve(&CancelToken::never()).await.unwrap();

    assert_eq!(pipeline.state().stage("intro"), Some(SceneStage::Resolved));
    assert_eq!(pipeline.state().stage("verse"), Some(SceneStage::Resolved));
    assert_eq!(pipeline.state().stage("outro"), Some(SceneStage::Pending));

    pipeline.reconcile().unwrap();
    let status = pipeline.status();
    assert_eq!(status[0].stage, SceneStage::Reconciled);
    assert_eq!(status[0].plan, Some("trim"));
    assert_eq!(status[2].native_secs, None);
}

#[tokio::test]
async fn test_compose_refuses_incomplete_timeline() {
    let h = Harness::new(StubBackend::failing(&["outro"]));
    let mut pipeline = h.pipeline(&three_scenes(), h.options());
    pipeline.resolve(&CancelToken::never()).await.unwrap();
    pipeline.reconcile().unwrap();

    let err = pipeline.compose(None).await.unwrap_err();

    assert!(matches!(err, MvgenError::State { ref message } if message.contains("outro")));
    assert_eq!(h.render_calls(), 0);
}

#[tokio::test]
async fn test_subtitle_file_cues_are_burned() {
    let h = Harness::new(StubBackend::default());
    std::fs::write(h.root().join("song.mp3"), b"mp3").unwrap();
    std::fs::write(
        h.root().join("lyrics.srt"),
        "1\n00:00:00,500 --> 00:00:01,500\nla la\n\n2\n00:00:04,000 --> 00:00:05,000\nhey\n",
    )
    .unwrap();
    let manifest = manifest(serde_json::json!({
        "project_name": "Lyrics",
        "audio": { "path": "song.mp3" },
        "subtitles": { "source": { "kind": "file", "path": "lyrics.srt" } },
        "scenes": [
            { "id": "a", "prompt": "sea", "duration": 3.0 },
            { "id": "b", "prompt": "sky", "duration": 3.0 }
        ]
    }));

    let report = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(h.render.cues.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_audio_subtitles_without_transcriber_is_audio_sync_error() {
    let h = Harness::new(StubBackend::default());
    std::fs::write(h.root().join("song.mp3"), b"mp3").unwrap();
    let manifest = manifest(serde_json::json!({
        "project_name": "Lyrics",
        "audio": { "path": "song.mp3" },
        "subtitles": { "source": { "kind": "audio" } },
        "scenes": [ { "id": "a", "prompt": "sea", "duration": 3.0 } ]
    }));

    let err = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, MvgenError::AudioSync { .. }));
    assert!(!h.output().exists());
}

#[tokio::test]
async fn test_format_override_changes_default_output_name() {
    let h = Harness::new(StubBackend::default());
    let mut options = h.options();
    options.output_path = None;
    options.format = Some(OutputFormat::Webm);
    options.quality = Some(Quality::Draft);
    let pipeline = h.pipeline(&three_scenes(), options);

    assert_eq!(pipeline.output_path(), h.root().join("neon.webm"));
    assert_eq!(pipeline.manifest().output.quality, Quality::Draft);
}

#[tokio::test]
async fn test_failed_export_forgets_earlier_output() {
    let h = Harness::new(StubBackend::default());
    let manifest = three_scenes();
    let first = h
        .pipeline(&manifest, h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();
    assert_eq!(first.exit_code(), 0);

    let mut failing =
        Pipeline::new(manifest, h.root(), h.options(), h.collaborators(true)).unwrap();
    let err = failing.run(&CancelToken::never(), None).await.unwrap_err();

    assert!(matches!(err, MvgenError::Encode { .. }));
    let report = failing.report();
    assert!(!report.is_success());
    assert_eq!(report.output_path, None);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.saved_state().output_path, None);
}

#[tokio::test]
async fn test_audio_settings_change_forgets_output() {
    let h = Harness::new(StubBackend::default());
    std::fs::write(h.root().join("song.mp3"), b"mp3").unwrap();
    std::fs::write(h.root().join("other.mp3"), b"mp3").unwrap();
    let with_track = |path: &str| {
        manifest(serde_json::json!({
            "project_name": "Neon",
            "audio": { "path": path },
            "scenes": [ { "id": "a", "prompt": "sea", "duration": 2.0 } ]
        }))
    };
    h.pipeline(&with_track("song.mp3"), h.options())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();
    assert!(h.saved_state().output_path.is_some());

    let pipeline = h.pipeline(&with_track("other.mp3"), h.options());

    assert_eq!(pipeline.state().output_path, None);
    assert_eq!(pipeline.report().exit_code(), 1);
    assert_eq!(pipeline.state().stage("a"), Some(SceneStage::Reconciled));
}

#[tokio::test]
async fn test_transcription_failure_is_audio_sync_error() {
    let h = Harness::new(StubBackend::default());
    std::fs::write(h.root().join("song.mp3"), b"mp3").unwrap();
    let manifest = manifest(serde_json::json!({
        "project_name": "Lyrics",
        "audio": { "path": "song.mp3" },
        "subtitles": { "source": { "kind": "audio" } },
        "scenes": [ { "id": "a", "prompt": "sea", "duration": 3.0 } ]
    }));
    let mut collaborators = h.collaborators(false);
    collaborators.transcriber = Some(Arc::new(OfflineTranscriber) as Arc<dyn Transcriber>);
    let mut pipeline = Pipeline::new(manifest, h.root(), h.options(), collaborators).unwrap();

    let err = pipeline.run(&CancelToken::never(), None).await.unwrap_err();

    assert!(
        matches!(err, MvgenError::AudioSync { ref message } if message.contains("connection refused")),
        "{err}"
    );
    assert!(err.is_compositor_fatal());
    assert_eq!(h.render_calls(), 0);
    assert!(!h.output().exists());
}

#[tokio::test]
async fn test_cancel_during_generation_stops_waiting() {
    let h = Harness::new(StubBackend::stalled(&["verse"]));
    let mut pipeline = h.pipeline(&three_scenes(), h.options());
    let (handle, token) = CancelHandle::new();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.run(&token, None))
        .await
        .expect("cancelled run should return before the poll deadline")
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(report.succeeded, vec!["intro", "outro"]);
    assert_eq!(report.failed_ids(), vec!["verse"]);
    assert_eq!(report.failed[0].stage, SceneStage::Cancelled);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.render_calls(), 0);

    let state = h.saved_state();
    assert_eq!(state.stage("verse"), Some(SceneStage::Cancelled));
    assert_eq!(state.counts().in_flight, 0);
    assert!(!h.root().join("clips/verse.mp4").exists());
    assert!(!h.root().join("clips/verse.mp4.part").exists());
    assert!(!h.output().exists());
}
