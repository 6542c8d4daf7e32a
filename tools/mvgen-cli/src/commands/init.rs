//! Write a starter manifest.

use std::path::PathBuf;

use mvgen_project_model::Manifest;

const STARTER: &str = r#"{
  "project_name": "Untitled",
  "output": { "aspect_ratio": "9:16", "frame_rate": 30, "format": "mp4", "quality": "final" },
  "audio": { "path": "audio/track.mp3", "fade_out_secs": 2.0 },
  "scenes": [
    {
      "id": "intro",
      "prompt": "slow aerial shot over a neon city at night",
      "duration": 4.0,
      "overlay": { "text": "Chapter One", "style": "title", "position": "center" },
      "transition": { "kind": "crossfade", "duration": 0.5 }
    },
    { "id": "verse", "file": "footage/verse.mp4", "duration": 6.0 },
    { "id": "outro", "prompt": "sunrise over the ocean", "duration": 5.0 }
  ]
}"#;

pub fn run(dir: PathBuf, name: String, force: bool) -> anyhow::Result<i32> {
    let path = dir.join("script.json");
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    if name.trim().is_empty() {
        anyhow::bail!("project name must not be empty");
    }
    let mut manifest = Manifest::from_json_str(STARTER)
        .map_err(|e| anyhow::anyhow!("Starter manifest is invalid: {e}"))?;
    manifest.project_name = name;

    std::fs::create_dir_all(&dir)?;
    manifest
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to write manifest: {e}"))?;

    println!("Created {}", path.display());
    println!();
    println!("Layout:");
    println!("  {}/", dir.display());
    println!("  ├── script.json   (scene manifest)");
    println!("  ├── audio/        (music track)");
    println!("  ├── footage/      (existing clips referenced by scenes)");
    println!("  └── clips/        (generated clips, created on first run)");
    println!();
    println!("Next: mvgen validate --script {}", path.display());

    Ok(0)
}
