//! Maps conversion settings to engine argument lists.
//!
//! Everything here is pure: the same input name, output name and settings
//! always produce the same command. Policy lives in small tables (quality,
//! preset, container) rather than in per-format builder functions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::settings::{
    file_extension, ConversionSettings, PresetProfile, Quality, TargetFormat, TimeWindow,
};

/// Ordered engine arguments. Window options (`-ss`, `-t`) always lead the
/// command, ahead of `-i`, so seeking happens once on the input side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeCommand(Vec<String>);

impl EncodeCommand {
    pub fn args(&self) -> &[String] {
        &self.0
    }

    /// Name the command writes to (the argument after `-y`)
    pub fn output_name(&self) -> Option<&str> {
        self.0
            .windows(2)
            .rev()
            .find(|pair| pair[0] == "-y")
            .map(|pair| pair[1].as_str())
    }

    /// Window currently applied to the input, if any
    pub fn window(&self) -> Option<TimeWindow> {
        let (start, duration) = self.leading_window()?;
        Some(TimeWindow { start, duration })
    }

    /// Copy of this command restricted to `window`, replacing any window
    /// the command already carried
    pub fn windowed(&self, window: TimeWindow) -> EncodeCommand {
        let skip = if self.leading_window().is_some() { 4 } else { 0 };
        let mut args = window_args(Some(window));
        args.extend(self.0.iter().skip(skip).cloned());
        EncodeCommand(args)
    }

    fn leading_window(&self) -> Option<(f64, f64)> {
        match self.0.as_slice() {
            [ss, start, t, duration, ..] if ss == "-ss" && t == "-t" => {
                Some((start.parse().ok()?, duration.parse().ok()?))
            }
            _ => None,
        }
    }
}

impl fmt::Display for EncodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains([' ', '\'', '"', ',']) {
                    format!("\"{}\"", arg.replace('"', "\\\""))
                } else {
                    arg.clone()
                }
            })
            .collect();
        write!(f, "ffmpeg {}", rendered.join(" "))
    }
}

/// Scale bound and constant rate factor for one quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    pub max_width: u32,
    pub crf: u8,
}

pub fn quality_policy(quality: Quality) -> QualityPolicy {
    match quality {
        Quality::High => QualityPolicy {
            max_width: 720,
            crf: 28,
        },
        Quality::Medium => QualityPolicy {
            max_width: 480,
            crf: 30,
        },
        Quality::Low => QualityPolicy {
            max_width: 360,
            crf: 32,
        },
    }
}

/// Fixed template of a platform preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetPolicy {
    pub max_width: u32,
    pub crf: u8,
    pub audio_bitrate: &'static str,
}

pub fn preset_policy(preset: PresetProfile) -> Option<PresetPolicy> {
    match preset {
        PresetProfile::None => None,
        PresetProfile::Twitter => Some(PresetPolicy {
            max_width: 720,
            crf: 30,
            audio_bitrate: "32k",
        }),
        PresetProfile::WhatsAppStatus => Some(PresetPolicy {
            max_width: 480,
            crf: 32,
            audio_bitrate: "24k",
        }),
    }
}

/// Container specific muxing flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerProfile {
    pub format: TargetFormat,
    pub muxer: &'static str,
    pub fast_start: bool,
}

const CONTAINERS: [ContainerProfile; 4] = [
    ContainerProfile {
        format: TargetFormat::Mp4,
        muxer: "mp4",
        fast_start: true,
    },
    ContainerProfile {
        format: TargetFormat::Mov,
        muxer: "mov",
        fast_start: true,
    },
    ContainerProfile {
        format: TargetFormat::Mkv,
        muxer: "matroska",
        fast_start: false,
    },
    ContainerProfile {
        format: TargetFormat::Avi,
        muxer: "avi",
        fast_start: false,
    },
];

pub fn container_profile(format: TargetFormat) -> &'static ContainerProfile {
    CONTAINERS
        .iter()
        .find(|profile| profile.format == format)
        .unwrap_or(&CONTAINERS[0])
}

/// Encoder knobs shared by every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderTuning {
    /// x264 speed preset of regular commands
    pub speed_preset: String,
    /// x264 speed preset of the MP4 to MP4 fast path
    pub fast_path_preset: String,
    pub tune: String,
    pub max_rate: String,
    pub buf_size: String,
    /// Audio bitrate outside presets
    pub audio_bitrate: String,
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self {
            speed_preset: "veryfast".to_string(),
            fast_path_preset: "superfast".to_string(),
            tune: "film".to_string(),
            max_rate: "1500k".to_string(),
            buf_size: "2000k".to_string(),
            audio_bitrate: "32k".to_string(),
        }
    }
}

enum Audio<'a> {
    Strip,
    Encode { bitrate: &'a str },
}

struct Recipe<'a> {
    speed_preset: &'a str,
    tune: Option<&'a str>,
    max_width: u32,
    crf: u8,
    audio: Audio<'a>,
    container: &'static ContainerProfile,
}

/// Builds [`EncodeCommand`]s from conversion settings
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    tuning: EncoderTuning,
}

impl CommandBuilder {
    pub fn new(tuning: EncoderTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &EncoderTuning {
        &self.tuning
    }

    /// Command for a whole conversion. Presets ignore the trim range.
    pub fn build(
        &self,
        input: &str,
        output: &str,
        settings: &ConversionSettings,
    ) -> EncodeCommand {
        let window = if settings.has_preset() {
            None
        } else {
            settings.trim_window()
        };
        self.build_window(input, output, settings, window)
    }

    /// Command restricted to an explicit window of the input
    pub fn build_window(
        &self,
        input: &str,
        output: &str,
        settings: &ConversionSettings,
        window: Option<TimeWindow>,
    ) -> EncodeCommand {
        let recipe = self.recipe(input, settings);

        let mut args = window_args(window);
        args.extend(strings(&["-i", input, "-c:v", "libx264", "-preset", recipe.speed_preset]));
        if let Some(tune) = recipe.tune {
            args.extend(strings(&["-tune", tune]));
        }
        args.extend(strings(&[
            "-profile:v",
            "high",
            "-level",
            "4.0",
            "-pix_fmt",
            "yuv420p",
            "-maxrate",
            &self.tuning.max_rate,
            "-bufsize",
            &self.tuning.buf_size,
            "-threads",
            "0",
            "-crf",
            &recipe.crf.to_string(),
            "-vf",
            &scale_filter(recipe.max_width),
        ]));
        if recipe.container.fast_start {
            args.extend(strings(&["-movflags", "+faststart"]));
        }
        args.extend(strings(&["-f", recipe.container.muxer]));
        match recipe.audio {
            Audio::Strip => args.push("-an".to_string()),
            Audio::Encode { bitrate } => args.extend(strings(&[
                "-c:a", "aac", "-b:a", bitrate, "-ac", "1", "-ar", "22050",
            ])),
        }
        args.extend(strings(&["-y", output]));

        EncodeCommand(args)
    }

    fn recipe<'a>(&'a self, input: &str, settings: &ConversionSettings) -> Recipe<'a> {
        if let Some(preset) = preset_policy(settings.preset) {
            return Recipe {
                speed_preset: &self.tuning.speed_preset,
                tune: Some(&self.tuning.tune),
                max_width: preset.max_width,
                crf: preset.crf,
                audio: Audio::Encode {
                    bitrate: preset.audio_bitrate,
                },
                container: container_profile(TargetFormat::Mp4),
            };
        }

        let policy = quality_policy(settings.quality);
        let audio = if settings.remove_audio {
            Audio::Strip
        } else {
            Audio::Encode {
                bitrate: &self.tuning.audio_bitrate,
            }
        };
        let fast_path =
            file_extension(input) == "mp4" && settings.target_format == TargetFormat::Mp4;

        Recipe {
            speed_preset: if fast_path {
                &self.tuning.fast_path_preset
            } else {
                &self.tuning.speed_preset
            },
            tune: (!fast_path).then_some(self.tuning.tune.as_str()),
            max_width: policy.max_width,
            crf: policy.crf,
            audio,
            container: container_profile(settings.target_format),
        }
    }
}

/// Width bounded by `max_width`, aspect kept, both dimensions even
pub fn scale_filter(max_width: u32) -> String {
    format!("scale='trunc(min({max_width},iw)/2)*2':-2")
}

/// Output geometry the scale filter produces for a `width`x`height` source
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let out_w = (width.min(max_width) / 2 * 2).max(2);
    // `-2` rounds the height to the nearest even value
    let half_h = (height as f64 * out_w as f64 / (width as f64 * 2.0)).round() as u32;
    let out_h = (half_h * 2).max(2);
    (out_w, out_h)
}

fn window_args(window: Option<TimeWindow>) -> Vec<String> {
    match window {
        Some(w) => vec![
            "-ss".to_string(),
            format_seconds(w.start),
            "-t".to_string(),
            format_seconds(w.duration),
        ],
        None => Vec::new(),
    }
}

/// Seconds without trailing zeros: `15`, `2.5`, `0.125`
pub fn format_seconds(seconds: f64) -> String {
    let text = format!("{seconds:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
