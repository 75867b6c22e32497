use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::command::{quality_policy, scaled_dimensions, CommandBuilder};
use crate::config::Config;
use crate::engine::{Engine, FfmpegEngine};
use crate::planner::{SegmentPlanner, Strategy};
use crate::probe::{DurationProber, MediaInfo};
use crate::settings::{ConversionSettings, MediaAsset, Quality};

/// Command to inspect a video and show how it would be compressed
pub struct ProbeCommand {
    path: PathBuf,
    config: Config,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub file: String,
    pub size_bytes: u64,
    #[serde(flatten)]
    pub info: MediaInfo,
    /// Segments a default conversion would use, 1 for a single job
    pub segments: usize,
    pub outputs: Vec<QualityOutput>,
}

/// Output geometry for one quality tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityOutput {
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
}

impl ProbeCommand {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self { path, config }
    }

    pub async fn execute(&self) -> Result<ProbeReport> {
        let mut engine = FfmpegEngine::new(&self.config.ffmpeg_path, false);
        engine
            .load()
            .await
            .with_context(|| format!("Could not start ffmpeg at {:?}", self.config.ffmpeg_path))?;
        let report = self.execute_with(&mut engine).await;
        if let Err(e) = engine.terminate().await {
            warn!("Failed to terminate probe engine: {}", e);
        }
        report
    }

    /// Probe with an already loaded engine
    pub async fn execute_with(&self, engine: &mut dyn Engine) -> Result<ProbeReport> {
        if !self.path.is_file() {
            return Err(anyhow!("Not a file: {:?}", self.path));
        }
        info!("🔎 Probing {:?}", self.path);

        let asset = MediaAsset::from_path(&self.path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        let info = DurationProber::inspect(engine, &asset).await?;
        Ok(build_report(&asset, info, &self.config))
    }

    pub fn print_report(&self, report: &ProbeReport, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        println!("\n📼 {}", report.file);
        println!("   Size:      {} bytes", report.size_bytes);
        println!("   Duration:  {:.0}s", report.info.duration_seconds);
        match (report.info.width, report.info.height) {
            (Some(w), Some(h)) => println!("   Geometry:  {w}x{h}"),
            _ => println!("   Geometry:  unknown"),
        }
        if report.segments > 1 {
            println!("   Strategy:  {} parallel segments", report.segments);
        } else {
            println!("   Strategy:  single job");
        }
        for output in &report.outputs {
            println!(
                "   {:<7}    {}x{}",
                output.quality.to_string(),
                output.width,
                output.height
            );
        }
        Ok(())
    }
}

/// Report for `asset` as a default conversion would treat it
pub fn build_report(asset: &MediaAsset, info: MediaInfo, config: &Config) -> ProbeReport {
    let planner = SegmentPlanner::new(config.segment_seconds, config.min_segmented_bytes);
    let builder = CommandBuilder::new(config.encoder_tuning());
    let strategy = planner.plan(
        info.duration_seconds,
        asset.size(),
        &ConversionSettings::default(),
        &builder,
        &asset.entry_name(),
        "probe",
    );
    let segments = match &strategy {
        Strategy::SingleJob => 1,
        Strategy::Segmented(plan) => plan.len(),
    };

    let outputs = match (info.width, info.height) {
        (Some(width), Some(height)) => Quality::ALL
            .iter()
            .map(|&quality| {
                let (width, height) =
                    scaled_dimensions(width, height, quality_policy(quality).max_width);
                QualityOutput {
                    quality,
                    width,
                    height,
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    ProbeReport {
        file: asset.file_name.clone(),
        size_bytes: asset.size(),
        info,
        segments,
        outputs,
    }
}
