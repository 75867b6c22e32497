use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while reading or validating user supplied settings
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("trim start ({start}s) is after trim end ({end}s)")]
    TrimOrder { start: f64, end: f64 },

    #[error("trim range {at}..{at} is empty; use 0..0 to keep the whole video")]
    EmptyTrim { at: f64 },

    #[error("trim bounds must be finite and non-negative, got {start}..{end}")]
    TrimBounds { start: f64, end: f64 },

    #[error("unknown {kind} '{value}'; expected one of: {expected}")]
    UnknownValue {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Video to be compressed. Immutable once created; the pipeline only reads it.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub raw_bytes: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

impl MediaAsset {
    pub fn new(raw_bytes: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_type_for(&file_name).to_string();
        Self {
            raw_bytes: raw_bytes.into(),
            file_name,
            mime_type,
        }
    }

    /// Load an asset from disk, keeping only the file name for engine entries
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        Ok(Self::new(bytes, file_name))
    }

    pub fn size(&self) -> u64 {
        self.raw_bytes.len() as u64
    }

    /// File name made safe for engine storage: path separators and other
    /// unusual characters become `_`
    pub fn entry_name(&self) -> String {
        let name: String = self
            .file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.trim_matches('.').is_empty() {
            "input".to_string()
        } else {
            name
        }
    }

    /// Lower-cased extension of the file name, empty when there is none
    pub fn extension(&self) -> String {
        file_extension(&self.file_name)
    }
}

/// Output quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::High, Quality::Medium, Quality::Low];
}

impl FromStr for Quality {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Quality::High),
            "medium" => Ok(Quality::Medium),
            "low" => Ok(Quality::Low),
            _ => Err(SettingsError::UnknownValue {
                kind: "quality",
                value: s.to_string(),
                expected: "high, medium, low",
            }),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        };
        f.write_str(name)
    }
}

/// Container of the compressed output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    #[default]
    Mp4,
    Mkv,
    Mov,
    Avi,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Mkv => "mkv",
            TargetFormat::Mov => "mov",
            TargetFormat::Avi => "avi",
        }
    }

    pub fn mime_type(self) -> &'static str {
        mime_type_for_extension(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Ok(TargetFormat::Mp4),
            "mkv" => Ok(TargetFormat::Mkv),
            "mov" => Ok(TargetFormat::Mov),
            "avi" => Ok(TargetFormat::Avi),
            _ => Err(SettingsError::UnknownValue {
                kind: "target format",
                value: s.to_string(),
                expected: "mp4, mkv, mov, avi",
            }),
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Platform specific command templates. A preset wins over quality, format and trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PresetProfile {
    #[default]
    None,
    Twitter,
    WhatsAppStatus,
}

impl FromStr for PresetProfile {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(PresetProfile::None),
            "twitter" | "x" => Ok(PresetProfile::Twitter),
            "whatsapp" | "whatsappstatus" => Ok(PresetProfile::WhatsAppStatus),
            _ => Err(SettingsError::UnknownValue {
                kind: "preset",
                value: s.to_string(),
                expected: "none, twitter, whatsapp",
            }),
        }
    }
}

/// A `[start, start + duration)` window on the source timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub duration: f64,
}

impl TimeWindow {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// User choices for one conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionSettings {
    pub quality: Quality,
    pub target_format: TargetFormat,
    pub trim_start: f64,
    pub trim_end: f64,
    pub remove_audio: bool,
    pub preset: PresetProfile,
}

impl ConversionSettings {
    /// Read settings from a JSON document such as `{"quality": "low", "targetFormat": "mkv"}`
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let (start, end) = (self.trim_start, self.trim_end);
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < 0.0 {
            return Err(SettingsError::TrimBounds { start, end });
        }
        if start > end {
            return Err(SettingsError::TrimOrder { start, end });
        }
        if start == end && start != 0.0 {
            return Err(SettingsError::EmptyTrim { at: start });
        }
        Ok(())
    }

    /// Trim range requested by the user. `0..0` (the default) means no trim.
    pub fn trim_window(&self) -> Option<TimeWindow> {
        if self.trim_end > self.trim_start {
            Some(TimeWindow {
                start: self.trim_start,
                duration: self.trim_end - self.trim_start,
            })
        } else {
            None
        }
    }

    pub fn has_preset(&self) -> bool {
        self.preset != PresetProfile::None
    }

    /// Container actually produced; presets always emit MP4
    pub fn output_format(&self) -> TargetFormat {
        if self.has_preset() {
            TargetFormat::Mp4
        } else {
            self.target_format
        }
    }
}

/// Compressed video handed back to the caller, who owns it from here on
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub output_file_name: String,
    pub output_bytes: Vec<u8>,
    pub mime_type: String,
    pub segments: usize,
}

impl ConversionResult {
    /// Write the output next to other results in `dir`, returning the written path
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.output_file_name);
        tokio::fs::write(&path, &self.output_bytes).await?;
        Ok(path)
    }
}

/// Name of the compressed file: `<stem>_compressed_<tag>.<ext>`
pub fn output_file_name(input_name: &str, format: TargetFormat, tag: &str) -> String {
    format!(
        "{}_compressed_{}.{}",
        file_stem(input_name),
        tag,
        format.extension()
    )
}

pub fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn mime_type_for(file_name: &str) -> &'static str {
    mime_type_for_extension(&file_extension(file_name))
}

fn mime_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
