//! Export: the single commit point of a run.
//!
//! The encoder writes `<stem>.partial.<ext>` next to the requested output.
//! Only a successful encode is renamed onto the output path; any failure
//! removes the partial file and surfaces as [`MvgenError::Encode`].

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use mvgen_audio_ai::save_subtitles;
use mvgen_common::error::{MvgenError, MvgenResult};

use crate::compositor::CompositionPlan;

/// An export job ready to be rendered.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Planned composition.
    pub plan: CompositionPlan,

    /// Final output file path.
    pub output_path: PathBuf,

    /// Write an `.srt` next to the output when subtitles were burned in.
    pub subtitle_sidecar: bool,
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Export progress report.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

/// Something that can encode a [`CompositionPlan`] to a file.
pub trait RenderBackend: Send {
    /// Encode `plan` into `output`. Blocking.
    fn render(
        &mut self,
        plan: &CompositionPlan,
        output: &Path,
        progress: Option<&ProgressCallback>,
    ) -> MvgenResult<()>;

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}

/// `<stem>.partial.<ext>` beside `output`.
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}

/// Render `job` with `backend` and commit the result to `job.output_path`.
pub async fn export_composition(
    job: ExportJob,
    backend: Box<dyn RenderBackend>,
    progress: Option<ProgressCallback>,
) -> MvgenResult<PathBuf> {
    tracing::info!(
        output = %job.output_path.display(),
        backend = backend.name(),
        format = ?job.plan.format,
        quality = ?job.plan.quality,
        total_secs = job.plan.total_secs(),
        "Starting export"
    );

    if !backend.is_available() {
        return Err(MvgenError::encode(format!(
            "render backend `{}` is not available",
            backend.name()
        )));
    }

    if let Some(parent) = job
        .output_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            MvgenError::encode(format!(
                "cannot create output directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let partial = partial_path(&job.output_path);
    remove_partial(&partial);

    if let Some(cb) = &progress {
        cb(ExportProgress {
            progress: 0.0,
            frames_rendered: 0,
            total_frames: job.plan.total_frames(),
            eta_secs: 0.0,
            stage: ExportStage::Preparing,
        });
    }

    let plan = job.plan;
    let render_target = partial.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut backend = backend;
        let result = backend.render(&plan, &render_target, progress.as_ref());
        if let (Err(_), Some(cb)) = (&result, &progress) {
            cb(ExportProgress {
                progress: 0.0,
                frames_rendered: 0,
                total_frames: plan.total_frames(),
                eta_secs: 0.0,
                stage: ExportStage::Failed,
            });
        }
        (result, plan)
    })
    .await;

    let plan = match joined {
        Ok((Ok(()), plan)) => plan,
        Ok((Err(e), _)) => {
            remove_partial(&partial);
            return Err(as_encode_error(e));
        }
        Err(e) => {
            remove_partial(&partial);
            return Err(MvgenError::encode(format!("render task failed: {e}")));
        }
    };

    if !partial.is_file() {
        return Err(MvgenError::encode(format!(
            "encoder reported success but wrote no file at {}",
            partial.display()
        )));
    }

    if let Err(e) = std::fs::rename(&partial, &job.output_path) {
        remove_partial(&partial);
        return Err(MvgenError::encode(format!(
            "failed to move {} into place: {e}",
            partial.display()
        )));
    }

    if job.subtitle_sidecar && !plan.cues.is_empty() {
        let sidecar = job.output_path.with_extension("srt");
        match save_subtitles(&plan.cues, &sidecar) {
            Ok(()) => tracing::info!(path = %sidecar.display(), cues = plan.cues.len(), "Wrote subtitle sidecar"),
            Err(e) => tracing::warn!(error = %e, path = %sidecar.display(), "Failed to write subtitle sidecar"),
        }
    }

    tracing::info!(output = %job.output_path.display(), "Export committed");
    Ok(job.output_path)
}

fn as_encode_error(err: MvgenError) -> MvgenError {
    match err {
        MvgenError::Encode { .. } => err,
        other => MvgenError::encode(other.to_string()),
    }
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial output"),
    }
}

/// Renders through the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: PathBuf,
}

impl FfmpegBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Use the configured binary, or find `ffmpeg` on `PATH`.
    pub fn locate(configured: Option<&Path>) -> MvgenResult<Self> {
        let binary = match configured {
            Some(path) => path.to_path_buf(),
            None => which::which("ffmpeg")
                .map_err(|_| MvgenError::config("ffmpeg not found on PATH"))?,
        };
        Ok(Self { binary })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn run_ffmpeg(
        &self,
        args: &[String],
        total_frames: u64,
        expected_duration_secs: f64,
        progress: Option<&ProgressCallback>,
    ) -> MvgenResult<()> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let start = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| MvgenError::encode(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            args_len = args.len(),
            total_frames,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MvgenError::encode("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MvgenError::encode("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        let mut latest_progress = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = std::time::Instant::now();
        loop {
            line.clear();
            let bytes = match reader.read_line(&mut line) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Nobody reads stdout past this point; stop ffmpeg before it blocks.
                    if let Err(kill_err) = child.kill() {
                        tracing::warn!(error = %kill_err, "Failed to kill ffmpeg");
                    }
                    let _ = child.wait();
                    let _ = stderr_task.join();
                    return Err(MvgenError::encode(format!(
                        "Failed reading ffmpeg progress: {e}"
                    )));
                }
            };
            if bytes == 0 {
                break;
            }

            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            latest_progress.update(key, value);
            if key != "progress" {
                continue;
            }
            if latest_progress.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = latest_progress.out_time_secs;
                last_progress_wall = std::time::Instant::now();
            }
            if let Some(cb) = progress {
                cb(progress_report(
                    &latest_progress,
                    total_frames,
                    expected_duration_secs,
                    start.elapsed().as_secs_f64(),
                ));
            }
            if last_progress_wall.elapsed().as_secs() >= 10 {
                tracing::warn!(
                    out_time_secs = latest_progress.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for 10s"
                );
                last_progress_wall = std::time::Instant::now();
            }
        }

        let status = child
            .wait()
            .map_err(|e| MvgenError::encode(format!("Failed to wait on ffmpeg: {e}")))?;

        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(MvgenError::encode(format!(
                "ffmpeg export failed (status {}): {}",
                status,
                tail(stderr_output.trim(), 2000)
            )));
        }

        if let Some(cb) = progress {
            cb(ExportProgress {
                progress: 1.0,
                frames_rendered: total_frames,
                total_frames,
                eta_secs: 0.0,
                stage: ExportStage::Complete,
            });
        }

        tracing::info!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            "ffmpeg finished"
        );
        Ok(())
    }
}

impl RenderBackend for FfmpegBackend {
    fn render(
        &mut self,
        plan: &CompositionPlan,
        output: &Path,
        progress: Option<&ProgressCallback>,
    ) -> MvgenResult<()> {
        let args = plan.ffmpeg_args(output);
        self.run_ffmpeg(&args, plan.total_frames(), plan.total_secs(), progress)
    }

    fn is_available(&self) -> bool {
        self.binary.is_file() || which::which(&self.binary).is_ok()
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both names.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    total_frames: u64,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> ExportProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let frames_rendered = (progress * total_frames as f64).round() as u64;
    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    ExportProgress {
        progress: if state.complete { 1.0 } else { progress },
        frames_rendered,
        total_frames,
        eta_secs,
        stage: if state.complete {
            ExportStage::Finalizing
        } else {
            ExportStage::Rendering
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path(Path::new("/out/video.mp4")),
            PathBuf::from("/out/video.partial.mp4")
        );
        assert_eq!(
            partial_path(Path::new("clip")),
            PathBuf::from("clip.partial")
        );
    }

    #[test]
    fn test_progress_state_parses_microseconds() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.out_time_secs - 2.5).abs() < 1e-9);
        state.update("out_time_ms", "3000000");
        assert!((state.out_time_secs - 3.0).abs() < 1e-9);
        state.update("progress", "continue");
        assert!(!state.complete);
        state.update("progress", "end");
        assert!(state.complete);
    }

    #[test]
    fn test_progress_report_estimates_eta() {
        let state = ProgressState {
            out_time_secs: 5.0,
            complete: false,
        };
        let report = progress_report(&state, 300, 10.0, 4.0);
        assert!((report.progress - 0.5).abs() < 1e-9);
        assert_eq!(report.frames_rendered, 150);
        assert!((report.eta_secs - 4.0).abs() < 1e-9);
        assert_eq!(report.stage, ExportStage::Rendering);
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }
}
