//! Resolve scenes to media files.

use std::path::PathBuf;

use mvgen_clip_resolver::ResolveAction;
use mvgen_common::AppConfig;
use mvgen_project_model::SceneStage;

use super::{cancel_on_ctrl_c, open_pipeline};

pub async fn run(
    config: &AppConfig,
    script: PathBuf,
    concurrency: Option<usize>,
    skip_existing: bool,
    dry_run: bool,
    limit: Option<usize>,
) -> anyhow::Result<i32> {
    let mut pipeline = open_pipeline(config, &script, |options| {
        if let Some(n) = concurrency {
            options.concurrency = n.max(1);
        }
        options.skip_existing |= skip_existing;
        options.limit = limit;
    })?;

    if dry_run {
        let plan = pipeline.plan_resolution();
        if plan.is_empty() {
            println!("Nothing to resolve.");
            return Ok(0);
        }
        println!("Would resolve {} scene(s):", plan.len());
        let mut missing = 0;
        for (scene_id, action) in &plan {
            match action {
                ResolveAction::UseFile { path, exists: true } => {
                    println!("  {scene_id}: probe {}", path.display())
                }
                ResolveAction::UseFile { path, exists: false } => {
                    missing += 1;
                    println!("  {scene_id}: MISSING {}", path.display())
                }
                ResolveAction::UseCached { path } => {
                    println!("  {scene_id}: reuse {}", path.display())
                }
                ResolveAction::Generate { path } => {
                    println!("  {scene_id}: generate -> {}", path.display())
                }
            }
        }
        return Ok(if missing > 0 { 1 } else { 0 });
    }

    let cancel = cancel_on_ctrl_c();
    pipeline.resolve(&cancel).await?;

    let mut failed = Vec::new();
    for status in pipeline.status() {
        match status.stage {
            SceneStage::Failed | SceneStage::Cancelled => {
                println!(
                    "  [FAIL] {}: {}",
                    status.scene_id,
                    status.error.as_deref().unwrap_or("cancelled")
                );
                failed.push(status.scene_id);
            }
            SceneStage::Pending => println!("  [SKIP] {}", status.scene_id),
            stage => println!(
                "  [OK]   {} ({stage}, {:.2}s native)",
                status.scene_id,
                status.native_secs.unwrap_or_default()
            ),
        }
    }

    if failed.is_empty() {
        Ok(0)
    } else {
        println!("\n{} scene(s) failed: {}", failed.len(), failed.join(", "));
        Ok(1)
    }
}
