//! Fit resolved clips to their declared durations.

use std::path::PathBuf;

use mvgen_common::AppConfig;
use mvgen_project_model::SceneStage;

use super::open_pipeline;

pub fn run(config: &AppConfig, script: PathBuf) -> anyhow::Result<i32> {
    let mut pipeline = open_pipeline(config, &script, |_| {})?;
    pipeline.reconcile()?;

    let mut failed = Vec::new();
    for status in pipeline.status() {
        match (status.stage, status.plan) {
            (SceneStage::Reconciled, Some(plan)) => println!(
                "  {:<16} {:>8.2}s -> {:>6.2}s  {plan}",
                status.scene_id,
                status.native_secs.unwrap_or_default(),
                status.target_secs,
            ),
            (SceneStage::Failed, _) => {
                println!(
                    "  {:<16} failed: {}",
                    status.scene_id,
                    status.error.as_deref().unwrap_or("unknown error")
                );
                failed.push(status.scene_id);
            }
            (stage, _) => println!("  {:<16} {stage}", status.scene_id),
        }
    }

    if failed.is_empty() {
        Ok(0)
    } else {
        println!("\n{} scene(s) failed: {}", failed.len(), failed.join(", "));
        Ok(1)
    }
}
