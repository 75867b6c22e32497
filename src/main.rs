//! # Condense - Video Compression CLI
//!
//! Compresses videos with ffmpeg. Long, large inputs are split into
//! time segments that a pool of engines encodes in parallel before the
//! pieces are joined back together.
//!
//! ## Features
//!
//! - **Parallel Segments**: Inputs over 5 MiB and longer than one segment are encoded concurrently
//! - **Quality Tiers**: High, medium and low map to output width and CRF
//! - **Platform Presets**: Twitter and WhatsApp status templates
//! - **Trim and Mute**: Keep a time range, drop the audio track
//! - **Background Processing**: Run encoders with low priority
//! - **Configurable**: Worker count, segment length and more via environment variables
//!
//! ## Usage
//!
//! ```bash
//! # Compress one file
//! condense compress holiday.mov -q medium -f mp4
//!
//! # Compress every video under a directory, skipping raw footage
//! condense compress /path/to/videos --exclude 'raw/*' -o /path/to/out
//!
//! # Show duration, geometry and the planned strategy
//! condense probe holiday.mov --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use condense::commands::{compress::CompressCommand, probe::ProbeCommand};
use condense::config::Config;
use condense::settings::{ConversionSettings, PresetProfile, Quality, TargetFormat};

/// Condense - Compress videos with ffmpeg, in parallel segments
#[derive(Parser)]
#[command(
    name = "condense",
    about = "Compress videos with ffmpeg",
    long_about = "Compresses videos with ffmpeg, splitting long inputs into segments that are encoded in parallel and joined back together.",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Compress a video, or every video under a directory
    Compress {
        /// Video file or directory of videos
        path: PathBuf,
        /// Output quality. Available: high, medium, low
        #[arg(long, short = 'q', default_value = "high")]
        quality: Quality,
        /// Output container. Available: mp4, mkv, mov, avi
        #[arg(long, short = 'f', default_value = "mp4")]
        format: TargetFormat,
        /// Start of the range to keep, in seconds
        #[arg(long, default_value_t = 0.0)]
        trim_start: f64,
        /// End of the range to keep, in seconds (0 keeps everything; must differ from a non-zero start)
        #[arg(long, default_value_t = 0.0)]
        trim_end: f64,
        /// Drop the audio track
        #[arg(long)]
        remove_audio: bool,
        /// Platform preset, overrides quality, format and trim. Available: twitter, whatsapp
        #[arg(long, short = 'p')]
        preset: Option<PresetProfile>,
        /// JSON settings file used instead of the flags above
        #[arg(long, short = 's')]
        settings: Option<PathBuf>,
        /// Directory for compressed files (defaults to next to each input)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Number of parallel segment encoders
        #[arg(long, short = 'w')]
        workers: Option<usize>,
        /// Run encoders in background with low priority
        #[arg(long, short)]
        background: bool,
        /// Glob patterns of inputs to skip
        #[arg(long, short = 'x')]
        exclude: Vec<String>,
    },
    /// Show duration, geometry and how a video would be compressed
    Probe {
        /// Video file to inspect
        path: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "condense=debug"
    } else {
        "condense=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();

    let result = match cli.command {
        Commands::Compress {
            path,
            quality,
            format,
            trim_start,
            trim_end,
            remove_audio,
            preset,
            settings,
            output,
            workers,
            background,
            exclude,
        } => {
            if let Some(workers) = workers.filter(|w| *w > 0) {
                config.workers = workers;
            }
            config.background_mode |= background;

            info!(
                "Starting compress command for path: {:?}, output: {:?}, workers: {}",
                path, output, config.workers
            );
            let run = async {
                let settings = match settings {
                    Some(file) => load_settings(&file).await?,
                    None => ConversionSettings {
                        quality,
                        target_format: format,
                        trim_start,
                        trim_end,
                        remove_audio,
                        preset: preset.unwrap_or_default(),
                    },
                };
                settings.validate()?;
                CompressCommand::new(path, output, settings, config)
                    .with_excludes(&exclude)?
                    .execute()
                    .await?;
                Ok::<(), anyhow::Error>(())
            };
            run.await
        }
        Commands::Probe { path, json } => {
            info!("Starting probe command for path: {:?}", path);
            let probe_cmd = ProbeCommand::new(path, config);
            match probe_cmd.execute().await {
                Ok(report) => probe_cmd.print_report(&report, json),
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn load_settings(file: &Path) -> Result<ConversionSettings> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read settings file {file:?}"))?;
    ConversionSettings::from_json(&json)
        .with_context(|| format!("Invalid settings file {file:?}"))
}
