//! Validate a manifest.

use std::path::PathBuf;

use mvgen_pipeline::manifest_dir;
use mvgen_project_model::{resolve_relative, SceneSource, SubtitleSource};

use super::load_manifest;

pub fn run(script: PathBuf) -> anyhow::Result<i32> {
    println!("Validating manifest: {}", script.display());

    let manifest = load_manifest(&script)?;
    let base = manifest_dir(&script);
    let output = &manifest.output;

    println!("  Project: {}", manifest.project_name);
    println!(
        "  Output: {}x{} ({}:{}) @ {}fps, {:?}/{:?}, fit {:?}",
        output.resolution.width,
        output.resolution.height,
        output.aspect_ratio.width,
        output.aspect_ratio.height,
        output.frame_rate,
        output.format,
        output.quality,
        output.fit,
    );
    println!(
        "  Scenes: {} ({} generated), {:.2}s total",
        manifest.scenes.len(),
        manifest.generation_count(),
        manifest.total_duration_secs()
    );

    let mut issues = Vec::new();
    for scene in &manifest.scenes {
        if let SceneSource::File(file) = &scene.source {
            let path = resolve_relative(&base, &file.path);
            if !path.is_file() {
                issues.push(format!(
                    "scene `{}`: file not found: {}",
                    scene.id,
                    path.display()
                ));
            }
        }
    }
    if let Some(audio) = &manifest.audio {
        let path = resolve_relative(&base, &audio.path);
        println!("  Audio: {}", path.display());
        if !path.is_file() {
            issues.push(format!("audio track not found: {}", path.display()));
        }
    }
    if let Some(subtitles) = &manifest.subtitles {
        match &subtitles.source {
            SubtitleSource::Audio => println!("  Subtitles: transcribed from audio"),
            SubtitleSource::File { path } => {
                let path = resolve_relative(&base, path);
                println!("  Subtitles: {}", path.display());
                if !path.is_file() {
                    issues.push(format!("subtitle file not found: {}", path.display()));
                }
            }
        }
    }

    if issues.is_empty() {
        println!("\nManifest is valid.");
        Ok(0)
    } else {
        println!("\nValidation issues:");
        for issue in &issues {
            println!("  - {issue}");
        }
        println!("\n{} issue(s) found.", issues.len());
        Ok(1)
    }
}
