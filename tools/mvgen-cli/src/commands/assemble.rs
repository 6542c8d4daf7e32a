//! Composite and export the reconciled scenes.

use std::path::PathBuf;

use mvgen_common::AppConfig;
use mvgen_project_model::{OutputFormat, Quality};

use super::{open_pipeline, print_report, progress_printer};

pub async fn run(
    config: &AppConfig,
    script: PathBuf,
    output: Option<PathBuf>,
    format: Option<OutputFormat>,
    quality: Option<Quality>,
    allow_partial: bool,
) -> anyhow::Result<i32> {
    let mut pipeline = open_pipeline(config, &script, |options| {
        options.output_path = output;
        options.format = format;
        options.quality = quality;
        options.allow_partial |= allow_partial;
    })?;

    println!("Assembling: {}", pipeline.manifest().project_name);
    println!("  Output: {}", pipeline.output_path().display());

    match pipeline.compose(Some(progress_printer())).await {
        Ok(path) => println!("\nExport complete: {}", path.display()),
        Err(e) => println!("\nExport failed: {e}"),
    }

    let report = pipeline.report();
    print_report(&report);
    Ok(report.exit_code())
}
