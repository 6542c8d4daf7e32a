//! Subcommand implementations and the plumbing they share.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mvgen_audio_ai::{HttpTranscriber, Transcriber};
use mvgen_clip_resolver::{FfprobeProber, GenerationBackend, HttpGenerationBackend};
use mvgen_common::{AppConfig, CancelHandle, CancelToken};
use mvgen_pipeline::{manifest_dir, Collaborators, Pipeline, PipelineOptions, PipelineReport};
use mvgen_project_model::Manifest;
use mvgen_render_engine::{ExportProgress, FfmpegBackend, ProgressCallback, RenderBackend};

pub mod assemble;
pub mod check;
pub mod init;
pub mod reconcile;
pub mod resolve;
pub mod run;
pub mod status;
pub mod subtitles;
pub mod validate;

pub(crate) fn load_manifest(script: &Path) -> anyhow::Result<Manifest> {
    Manifest::load(script)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest {}: {e}", script.display()))
}

/// Build the pipeline for `script`, letting the caller adjust options.
pub(crate) fn open_pipeline(
    config: &AppConfig,
    script: &Path,
    adjust: impl FnOnce(&mut PipelineOptions),
) -> anyhow::Result<Pipeline> {
    let manifest = load_manifest(script)?;
    let dir = manifest_dir(script);
    let mut options = PipelineOptions::from_config(config, &dir);
    adjust(&mut options);
    Ok(Pipeline::new(manifest, dir, options, collaborators(config)?)?)
}

/// Collaborators from configuration. Missing media tools are reported when
/// they are first used, not here.
pub(crate) fn collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    let generation = match &config.generation.base_url {
        Some(url) => {
            let backend = HttpGenerationBackend::new(url, config.generation.request_timeout())
                .map_err(|e| anyhow::anyhow!("Failed to create generation backend: {e}"))?;
            Some(Arc::new(backend) as Arc<dyn GenerationBackend>)
        }
        None => None,
    };

    let prober = FfprobeProber::locate(config.render.ffprobe_path.as_deref())
        .or_else(|e| {
            tracing::warn!(error = %e, "ffprobe not located; probing will fail");
            FfprobeProber::locate(Some(Path::new("ffprobe")))
        })?;

    let transcriber = HttpTranscriber::from_config(&config.transcription)?
        .map(|t| Arc::new(t) as Arc<dyn Transcriber>);

    let ffmpeg: PathBuf = FfmpegBackend::locate(config.render.ffmpeg_path.as_deref())
        .map(|b| b.binary().to_path_buf())
        .unwrap_or_else(|_| PathBuf::from("ffmpeg"));

    Ok(Collaborators {
        generation,
        prober: Arc::new(prober),
        transcriber,
        renderer: Box::new(move || {
            Box::new(FfmpegBackend::new(ffmpeg.clone())) as Box<dyn RenderBackend>
        }),
    })
}

/// Cancellation token tripped by Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = CancelHandle::new();
    tokio::spawn(cancel_after_signal(handle));
    token
}

async fn cancel_after_signal(handle: CancelHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nCancelling: waiting for in-flight work to stop...");
        handle.cancel();
    }
}

pub(crate) fn progress_printer() -> ProgressCallback {
    Box::new(|p: ExportProgress| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.eta_secs,
        );
        let _ = std::io::stdout().flush();
    })
}

pub(crate) fn print_report(report: &PipelineReport) {
    println!();
    println!("Project: {}", report.project);
    println!("  Succeeded: {}", report.succeeded.len());
    if !report.pending.is_empty() {
        println!("  Not attempted: {}", report.pending.join(", "));
    }
    if !report.failed.is_empty() {
        println!("  Failed: {}", report.failed.len());
        for failure in &report.failed {
            println!(
                "    - {} ({}): {}",
                failure.scene_id, failure.stage, failure.error
            );
        }
    }
    match &report.output_path {
        Some(path) => {
            print!("  Output: {}", path.display());
            match report.total_duration_secs {
                Some(secs) => println!(" ({secs:.2}s)"),
                None => println!(),
            }
        }
        None => println!("  Output: none"),
    }
    if !report.failed.is_empty() {
        println!(
            "\n{} scene(s) failed: {}",
            report.failed.len(),
            report.failed_ids().join(", ")
        );
    }
}
