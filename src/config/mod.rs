use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::assemble::ReassemblyMode;
use crate::command::EncoderTuning;
use crate::planner::{DEFAULT_MIN_SEGMENTED_BYTES, DEFAULT_SEGMENT_SECONDS};
use crate::pool::{PoolConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

/// Configuration for FFmpeg and pipeline behavior
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ffmpeg_path: PathBuf,
    pub ffmpeg_preset: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub segment_seconds: f64,
    pub min_segmented_bytes: u64,
    /// Per-task watchdog in seconds, 0 disables it
    pub task_timeout_secs: u64,
    pub reassembly: ReassemblyMode,
    /// Keep the worker pool alive between conversions
    pub keep_pool_warm: bool,
    /// Run encoders with `nice -n 19`
    pub background_mode: bool,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffmpeg_preset: env::var("FFMPEG_PRESET").unwrap_or(defaults.ffmpeg_preset),
            workers: parse_var::<usize>("CONDENSE_WORKERS")
                .filter(|w| *w > 0)
                .unwrap_or(defaults.workers),
            queue_capacity: parse_var::<usize>("CONDENSE_QUEUE_CAPACITY")
                .filter(|c| *c > 0)
                .unwrap_or(defaults.queue_capacity),
            segment_seconds: parse_var::<f64>("CONDENSE_SEGMENT_SECONDS")
                .filter(|s| s.is_finite() && *s > 0.0)
                .unwrap_or(defaults.segment_seconds),
            min_segmented_bytes: parse_var::<u64>("CONDENSE_SEGMENT_MIN_BYTES")
                .unwrap_or(defaults.min_segmented_bytes),
            task_timeout_secs: parse_var::<u64>("CONDENSE_TASK_TIMEOUT")
                .unwrap_or(defaults.task_timeout_secs),
            reassembly: parse_var::<ReassemblyMode>("CONDENSE_REASSEMBLY")
                .unwrap_or(defaults.reassembly),
            keep_pool_warm: parse_var::<bool>("CONDENSE_WARM_POOL")
                .unwrap_or(defaults.keep_pool_warm),
            background_mode: defaults.background_mode,
        }
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            task_timeout: self.task_timeout(),
        }
    }

    pub fn encoder_tuning(&self) -> EncoderTuning {
        EncoderTuning {
            speed_preset: self.ffmpeg_preset.clone(),
            ..EncoderTuning::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffmpeg_preset: "veryfast".to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            segment_seconds: DEFAULT_SEGMENT_SECONDS,
            min_segmented_bytes: DEFAULT_MIN_SEGMENTED_BYTES,
            task_timeout_secs: 600,
            reassembly: ReassemblyMode::Concat,
            keep_pool_warm: false,
            background_mode: false,
        }
    }
}

/// Parse an environment variable, treating unset or malformed values as absent
fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
