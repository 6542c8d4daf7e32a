//! Show per-scene pipeline state.

use std::path::PathBuf;

use mvgen_common::AppConfig;

use super::open_pipeline;

pub fn run(config: &AppConfig, script: PathBuf, json: bool) -> anyhow::Result<i32> {
    let pipeline = open_pipeline(config, &script, |_| {})?;
    let rows = pipeline.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }

    let state = pipeline.state();
    println!("Project: {}", state.project_name);
    println!("  Updated: {}", state.updated_at);
    println!();
    println!(
        "  {:<16} {:<12} {:<9} {:>8} {:>8}  {:<11} {}",
        "SCENE", "STAGE", "SOURCE", "TARGET", "NATIVE", "PLAN", "TRIES"
    );
    for row in &rows {
        println!(
            "  {:<16} {:<12} {:<9} {:>7.2}s {:>8}  {:<11} {}",
            row.scene_id,
            row.stage.as_str(),
            row.source,
            row.target_secs,
            row.native_secs
                .map(|s| format!("{s:.2}s"))
                .unwrap_or_else(|| "-".to_string()),
            row.plan.unwrap_or("-"),
            row.attempts,
        );
        if let Some(error) = &row.error {
            println!("  {:<16} error: {error}", "");
        }
    }

    let counts = state.counts();
    println!();
    println!(
        "  {} reconciled, {} resolved, {} pending, {} failed, {} cancelled",
        counts.reconciled, counts.resolved, counts.pending, counts.failed, counts.cancelled
    );
    match &state.output_path {
        Some(path) => println!("  Output: {}", path.display()),
        None => println!("  Output: not yet assembled"),
    }
    if let Some(error) = state.errors.last() {
        println!("  Last run error: {error}");
    }

    Ok(0)
}
