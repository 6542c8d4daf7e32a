//! Full pipeline: resolve, reconcile, composite, export.

use std::path::PathBuf;

use mvgen_common::AppConfig;
use mvgen_project_model::{OutputFormat, Quality};

use super::{cancel_on_ctrl_c, open_pipeline, print_report, progress_printer};

pub struct RunArgs {
    pub script: PathBuf,
    pub output: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub skip_existing: bool,
    pub allow_partial: bool,
    pub format: Option<OutputFormat>,
    pub quality: Option<Quality>,
}

pub async fn run(config: &AppConfig, args: RunArgs) -> anyhow::Result<i32> {
    let mut pipeline = open_pipeline(config, &args.script, |options| {
        if let Some(n) = args.concurrency {
            options.concurrency = n.max(1);
        }
        options.skip_existing |= args.skip_existing;
        options.allow_partial |= args.allow_partial;
        options.output_path = args.output;
        options.format = args.format;
        options.quality = args.quality;
    })?;

    let manifest = pipeline.manifest();
    println!("Running: {}", manifest.project_name);
    println!(
        "  Scenes: {} ({} generated), {:.2}s",
        manifest.scenes.len(),
        manifest.generation_count(),
        manifest.total_duration_secs()
    );
    println!("  Output: {}", pipeline.output_path().display());

    let cancel = cancel_on_ctrl_c();
    let result = pipeline.run(&cancel, Some(progress_printer())).await;
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(report.exit_code())
        }
        Err(e) => {
            println!("\nRun aborted: {e}");
            print_report(&pipeline.report());
            Ok(1)
        }
    }
}
