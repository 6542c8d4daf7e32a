//! Check tools and configured services.

use mvgen_clip_resolver::FfprobeProber;
use mvgen_common::{config_file_path, AppConfig};
use mvgen_render_engine::{FfmpegBackend, RenderBackend};

pub fn run(config: &AppConfig) -> anyhow::Result<i32> {
    println!("mvgen System Check");
    println!("{}", "=".repeat(50));

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[--] Config: defaults ({} not found)", config_path.display());
    }

    let mut required_ok = true;

    match FfmpegBackend::locate(config.render.ffmpeg_path.as_deref()) {
        Ok(ffmpeg) if ffmpeg.is_available() => {
            println!("[OK] ffmpeg: {}", ffmpeg.binary().display())
        }
        Ok(ffmpeg) => {
            required_ok = false;
            println!("[FAIL] ffmpeg: {} is not executable", ffmpeg.binary().display());
        }
        Err(e) => {
            required_ok = false;
            println!("[FAIL] ffmpeg: {e}");
        }
    }

    match FfprobeProber::locate(config.render.ffprobe_path.as_deref()) {
        Ok(ffprobe) if ffprobe.binary().is_file() || which::which(ffprobe.binary()).is_ok() => {
            println!("[OK] ffprobe: {}", ffprobe.binary().display())
        }
        Ok(ffprobe) => {
            required_ok = false;
            println!("[FAIL] ffprobe: {} not found", ffprobe.binary().display());
        }
        Err(e) => {
            required_ok = false;
            println!("[FAIL] ffprobe: {e}");
        }
    }

    match &config.generation.base_url {
        Some(url) => println!("[OK] Generation service: {url}"),
        None => println!("[WARN] Generation service: not configured (prompt scenes will fail)"),
    }
    match &config.transcription.base_url {
        Some(url) => println!("[OK] Transcription service: {url}"),
        None => println!(
            "[WARN] Transcription service: not configured (audio subtitles unavailable)"
        ),
    }

    println!();
    println!(
        "  Concurrency: {}, skip existing: {}, allow partial: {}",
        config.pipeline.concurrency, config.pipeline.skip_existing, config.pipeline.allow_partial
    );

    println!();
    if required_ok {
        println!("All required tools are available. mvgen is ready.");
        Ok(0)
    } else {
        println!("Some required tools are missing. Install ffmpeg or set render.ffmpeg_path.");
        Ok(1)
    }
}
