//! mvgen CLI: command-line interface for manifest-driven music videos.
//!
//! Usage:
//!   mvgen init <DIR>              Write a starter manifest
//!   mvgen validate --script <P>   Parse and validate a manifest
//!   mvgen resolve --script <P>    Resolve scenes to media files
//!   mvgen reconcile --script <P>  Fit resolved clips to their durations
//!   mvgen assemble --script <P>   Composite and export reconciled scenes
//!   mvgen run --script <P>        Full pipeline
//!   mvgen status --script <P>     Per-scene pipeline state
//!   mvgen subtitles --audio <F>   Transcribe audio to a subtitle file
//!   mvgen check                   Check tools and configured services

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mvgen_project_model::{OutputFormat, Quality};

mod commands;

#[derive(Parser)]
#[command(
    name = "mvgen",
    about = "Compile a scene manifest into a finished music video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/mvgen/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter manifest
    Init {
        /// Project directory
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Project name
        #[arg(short, long, default_value = "My Music Video")]
        name: String,

        /// Overwrite an existing manifest
        #[arg(long)]
        force: bool,
    },

    /// Parse and validate a manifest
    Validate {
        /// Path to the manifest (.json or .toml)
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,
    },

    /// Resolve every scene to a concrete media file
    Resolve {
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,

        /// Maximum scenes resolving at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Reuse previously generated clips
        #[arg(long)]
        skip_existing: bool,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,

        /// Resolve at most this many scenes
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fit resolved clips to their declared durations
    Reconcile {
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,
    },

    /// Composite and export the reconciled scenes
    Assemble {
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output container: mp4, webm, mov
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Encoding quality: draft, final
        #[arg(long)]
        quality: Option<Quality>,

        /// Export even if some scenes failed
        #[arg(long)]
        allow_partial: bool,
    },

    /// Run the full pipeline
    Run {
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum scenes resolving at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Reuse previously generated clips
        #[arg(long)]
        skip_existing: bool,

        /// Export even if some scenes failed
        #[arg(long)]
        allow_partial: bool,

        /// Output container: mp4, webm, mov
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Encoding quality: draft, final
        #[arg(long)]
        quality: Option<Quality>,
    },

    /// Show per-scene pipeline state
    Status {
        #[arg(short, long, default_value = "script.json")]
        script: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Transcribe an audio file to SRT or VTT
    Subtitles {
        /// Audio file to transcribe
        #[arg(short, long)]
        audio: PathBuf,

        /// Output file (.srt or .vtt)
        #[arg(short, long)]
        output: PathBuf,

        /// Language hint (ISO 639-1)
        #[arg(long)]
        language: Option<String>,
    },

    /// Check tools and configured services
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => mvgen_common::AppConfig::load_from(path),
        None => mvgen_common::AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    mvgen_common::logging::init_logging(&config.logging);

    let code = match cli.command {
        Commands::Init { dir, name, force } => commands::init::run(dir, name, force)?,
        Commands::Validate { script } => commands::validate::run(script)?,
        Commands::Resolve {
            script,
            concurrency,
            skip_existing,
            dry_run,
            limit,
        } => {
            commands::resolve::run(
                &config,
                script,
                concurrency,
                skip_existing,
                dry_run,
                limit,
            )
            .await?
        }
        Commands::Reconcile { script } => commands::reconcile::run(&config, script)?,
        Commands::Assemble {
            script,
            output,
            format,
            quality,
            allow_partial,
        } => {
            commands::assemble::run(&config, script, output, format, quality, allow_partial)
                .await?
        }
        Commands::Run {
            script,
            output,
            concurrency,
            skip_existing,
            allow_partial,
            format,
            quality,
        } => {
            commands::run::run(
                &config,
                commands::run::RunArgs {
                    script,
                    output,
                    concurrency,
                    skip_existing,
                    allow_partial,
                    format,
                    quality,
                },
            )
            .await?
        }
        Commands::Status { script, json } => commands::status::run(&config, script, json)?,
        Commands::Subtitles {
            audio,
            output,
            language,
        } => commands::subtitles::run(&config, audio, output, language).await?,
        Commands::Check => commands::check::run(&config)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
