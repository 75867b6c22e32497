use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::settings::{ConversionSettings, MediaAsset};

/// Extensions picked up when compressing a directory
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "mkv", "mov", "avi", "webm", "m4v", "flv", "wmv"];

/// Marker in the names of files this tool wrote
const OUTPUT_MARKER: &str = "_compressed_";

/// Command to compress one video or every video under a directory
pub struct CompressCommand {
    path: PathBuf,
    output_dir: Option<PathBuf>,
    settings: ConversionSettings,
    excludes: Vec<Pattern>,
    config: Config,
}

/// What happened to each input
#[derive(Debug, Default)]
pub struct CompressReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CompressCommand {
    pub fn new(
        path: PathBuf,
        output_dir: Option<PathBuf>,
        settings: ConversionSettings,
        config: Config,
    ) -> Self {
        Self {
            path,
            output_dir,
            settings,
            excludes: Vec::new(),
            config,
        }
    }

    /// Skip inputs whose path relative to the scanned directory, or whose
    /// file name, matches any of `patterns`
    pub fn with_excludes(mut self, patterns: &[String]) -> Result<Self> {
        self.excludes = patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("Invalid exclude pattern '{p}'")))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub async fn execute(&self) -> Result<CompressReport> {
        let inputs = self.collect_inputs()?;
        if inputs.is_empty() {
            warn!("⚠️ No videos found under {:?}", self.path);
            return Ok(CompressReport::default());
        }

        let mut orchestrator = Orchestrator::with_ffmpeg(self.config.clone())
            .await
            .with_context(|| format!("Could not start ffmpeg at {:?}", self.config.ffmpeg_path))?;
        let report = self.compress_all(&mut orchestrator, &inputs).await;
        orchestrator.shutdown().await;

        let report = report?;
        if !report.failed.is_empty() {
            return Err(anyhow!(
                "{} of {} videos failed to compress",
                report.failed.len(),
                inputs.len()
            ));
        }
        Ok(report)
    }

    /// Every video to compress: `path` itself, or the videos found below it
    pub fn collect_inputs(&self) -> Result<Vec<PathBuf>> {
        if !self.path.exists() {
            return Err(anyhow!("Path does not exist: {:?}", self.path));
        }
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }

        info!("🔎 Scanning directory: {:?}", self.path);
        let mut inputs: Vec<PathBuf> = WalkDir::new(&self.path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| is_video(path))
            .filter(|path| !self.is_excluded(path))
            .collect();
        inputs.sort();

        info!("Found {} videos to compress", inputs.len());
        Ok(inputs)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.path).unwrap_or(path);
        let file_name = path.file_name().map(Path::new).unwrap_or(relative);
        let excluded = self
            .excludes
            .iter()
            .any(|p| p.matches_path(relative) || p.matches_path(file_name));
        if excluded {
            debug!("Excluded by pattern: {:?}", relative);
        }
        excluded
    }

    async fn compress_all(
        &self,
        orchestrator: &mut Orchestrator,
        inputs: &[PathBuf],
    ) -> Result<CompressReport> {
        let mut report = CompressReport::default();

        tokio::pin! {
            let shutdown_signal = signal::ctrl_c();
        }

        for input in inputs {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("🛑 Shutdown signal received. Stopping after {} videos.", report.written.len());
                    break;
                }
                outcome = self.compress_one(orchestrator, input) => match outcome {
                    Ok(path) => report.written.push(path),
                    Err(e) => {
                        error!("❌ {:?}: {:#}", input, e);
                        report.failed.push((input.clone(), format!("{e:#}")));
                    }
                },
            }
        }

        info!(
            "✅ Compression complete: {} written, {} failed",
            report.written.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Compress `input` and write the result, returning the written path
    pub async fn compress_one(
        &self,
        orchestrator: &mut Orchestrator,
        input: &Path,
    ) -> Result<PathBuf> {
        let asset = MediaAsset::from_path(input)
            .await
            .with_context(|| format!("Failed to read {input:?}"))?;

        let bar = progress_bar(&asset.file_name);
        let (tx, mut rx) = mpsc::unbounded_channel::<f64>();
        let watcher = {
            let bar = bar.clone();
            tokio::spawn(async move {
                while let Some(percent) = rx.recv().await {
                    bar.set_position(percent.round() as u64);
                }
            })
        };

        let converted = orchestrator
            .convert_with_progress(&asset, &self.settings, tx)
            .await;
        let _ = watcher.await;

        let result = match converted {
            Ok(result) => {
                bar.finish_with_message("done");
                result
            }
            Err(e) => {
                bar.abandon_with_message("failed");
                return Err(e.into());
            }
        };

        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let written = result
            .write_to(&dir)
            .await
            .with_context(|| format!("Failed to write output into {dir:?}"))?;

        info!(
            "💾 {} -> {:?} ({} -> {} bytes, {} segments)",
            asset.file_name,
            written,
            asset.size(),
            result.output_bytes.len(),
            result.segments
        );
        Ok(written)
    }
}

/// Whether `path` looks like a video this tool did not produce itself
pub fn is_video(path: &Path) -> bool {
    let is_output = path
        .file_name()
        .map(|n| n.to_string_lossy().contains(OUTPUT_MARKER))
        .unwrap_or(false);
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    !is_output && VIDEO_EXTENSIONS.contains(&extension.as_str())
}

fn progress_bar(file_name: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {prefix} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar.set_prefix(file_name.to_string());
    bar
}
