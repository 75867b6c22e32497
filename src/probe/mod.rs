//! Reads stream duration and geometry from the engine's diagnostic output.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::progress::ProgressSink;
use crate::settings::MediaAsset;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})").expect("valid regex"))
}

fn geometry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Video:.*?\b(\d{2,5})x(\d{2,5})\b").expect("valid regex"))
}

/// Whole seconds of the first `Duration: HH:MM:SS` found in `text`
pub fn parse_duration(text: &str) -> Option<f64> {
    let caps = duration_regex().captures(text)?;
    let field = |i: usize| caps[i].parse::<u64>().ok();
    let (h, m, s) = (field(1)?, field(2)?, field(3)?);
    Some((h * 3600 + m * 60 + s) as f64)
}

/// Width and height of the first video stream in `text`
pub fn parse_geometry(text: &str) -> Option<(u32, u32)> {
    let caps = geometry_regex().captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// What the probe learned about an input
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MediaInfo {
    /// Zero when the engine did not report a duration
    pub duration_seconds: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Runs a no-op engine invocation against an asset and reads its diagnostics.
///
/// The engine reports an error for an invocation without an output; that
/// is the expected path here, and its diagnostics are parsed all the same.
pub struct DurationProber;

impl DurationProber {
    /// Duration of `asset` in seconds, 0 when undeterminable
    pub async fn probe(engine: &mut dyn Engine, asset: &MediaAsset) -> Result<f64, EngineError> {
        Ok(Self::inspect(engine, asset).await?.duration_seconds)
    }

    /// Duration and geometry of `asset`. The input entry is removed before returning.
    pub async fn inspect(
        engine: &mut dyn Engine,
        asset: &MediaAsset,
    ) -> Result<MediaInfo, EngineError> {
        let entry = asset.entry_name();
        let name = entry.as_str();
        engine.write_input(name, &asset.raw_bytes).await?;

        let args = vec!["-i".to_string(), name.to_string()];
        let diagnostics = match engine.exec(&args, &ProgressSink::noop()).await {
            Ok(output) => output.diagnostics,
            Err(EngineError::Exec { diagnostics, .. }) => diagnostics,
            Err(e) => {
                let _ = engine.delete_entry(name).await;
                return Err(e);
            }
        };

        if let Err(e) = engine.delete_entry(name).await {
            warn!("Failed to remove probe input {}: {}", name, e);
        }

        let duration_seconds = parse_duration(&diagnostics).unwrap_or(0.0);
        let geometry = parse_geometry(&diagnostics);
        debug!(
            "Probed {}: duration {}s, geometry {:?}",
            name, duration_seconds, geometry
        );

        Ok(MediaInfo {
            duration_seconds,
            width: geometry.map(|(w, _)| w),
            height: geometry.map(|(_, h)| h),
        })
    }
}
