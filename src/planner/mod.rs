use tracing::debug;

use crate::command::{CommandBuilder, EncodeCommand};
use crate::settings::{ConversionSettings, TimeWindow};

pub const DEFAULT_SEGMENT_SECONDS: f64 = 15.0;
pub const DEFAULT_MIN_SEGMENTED_BYTES: u64 = 5 * 1024 * 1024;

/// Encode commands carry times in milliseconds; anything finer is float noise.
const MILLIS_PER_SECOND: f64 = 1000.0;

/// One bounded slice of the input, encoded independently
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    /// Offset from the start of the planned window
    pub start_offset: f64,
    pub duration: f64,
    pub output_name: String,
    pub command: EncodeCommand,
}

/// Segments in index order, contiguous and covering the planned window
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub segments: Vec<Segment>,
    pub total_duration: f64,
}

impl SegmentPlan {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    SingleJob,
    Segmented(SegmentPlan),
}

/// Decides between one encode and a segmented run
#[derive(Debug, Clone)]
pub struct SegmentPlanner {
    pub segment_seconds: f64,
    pub min_segmented_bytes: u64,
}

impl Default for SegmentPlanner {
    fn default() -> Self {
        Self {
            segment_seconds: DEFAULT_SEGMENT_SECONDS,
            min_segmented_bytes: DEFAULT_MIN_SEGMENTED_BYTES,
        }
    }
}

impl SegmentPlanner {
    pub fn new(segment_seconds: f64, min_segmented_bytes: u64) -> Self {
        Self {
            segment_seconds,
            min_segmented_bytes,
        }
    }

    /// Plan a conversion of `duration_seconds` of media weighing `file_size` bytes.
    ///
    /// Segmenting pays off only when the planned window is longer than one
    /// segment and the payload is large; anything else, including an
    /// unknown (zero) duration, is a single job. Segment outputs are named
    /// `<tag>_segment_<i>.<ext>`.
    pub fn plan(
        &self,
        duration_seconds: f64,
        file_size: u64,
        settings: &ConversionSettings,
        builder: &CommandBuilder,
        input_name: &str,
        tag: &str,
    ) -> Strategy {
        let window = self.planned_window(duration_seconds, settings);
        if window.duration <= self.segment_seconds
            || file_size <= self.min_segmented_bytes
            || self.segment_seconds <= 0.0
        {
            debug!(
                "Single job: {:.1}s window, {} bytes",
                window.duration, file_size
            );
            return Strategy::SingleJob;
        }

        let extension = settings.output_format().extension();
        let count = (window.duration / self.segment_seconds).ceil() as usize;
        let segments = (0..count)
            .take_while(|index| {
                window.duration - *index as f64 * self.segment_seconds >= 1.0 / MILLIS_PER_SECOND
            })
            .map(|index| {
                let start_offset = index as f64 * self.segment_seconds;
                let duration = self.segment_seconds.min(window.duration - start_offset);
                let output_name = format!("{tag}_segment_{index}.{extension}");
                let command = builder
                    .build(input_name, &output_name, settings)
                    .windowed(TimeWindow {
                        start: window.start + start_offset,
                        duration,
                    });
                Segment {
                    index,
                    start_offset,
                    duration,
                    output_name,
                    command,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Segmented plan: {} segments over {:.1}s starting at {:.1}s",
            segments.len(),
            window.duration,
            window.start
        );
        Strategy::Segmented(SegmentPlan {
            segments,
            total_duration: window.duration,
        })
    }

    /// Part of the source that will be encoded: the trim range clipped to
    /// the probed duration, or the whole source. Presets ignore trimming.
    fn planned_window(&self, duration_seconds: f64, settings: &ConversionSettings) -> TimeWindow {
        let duration_seconds = duration_seconds.max(0.0);
        match settings.trim_window().filter(|_| !settings.has_preset()) {
            Some(trim) => {
                let available = (duration_seconds - trim.start).max(0.0);
                TimeWindow {
                    start: trim.start,
                    duration: to_millis(trim.duration.min(available)),
                }
            }
            None => TimeWindow {
                start: 0.0,
                duration: to_millis(duration_seconds),
            },
        }
    }
}

fn to_millis(seconds: f64) -> f64 {
    (seconds * MILLIS_PER_SECOND).round() / MILLIS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PresetProfile;

    const MIB: u64 = 1024 * 1024;

    fn plan(duration: f64, size: u64, settings: &ConversionSettings) -> Strategy {
        SegmentPlanner::default().plan(
            duration,
            size,
            settings,
            &CommandBuilder::default(),
            "in.mkv",
            "t",
        )
    }

    fn segments(strategy: Strategy) -> SegmentPlan {
        match strategy {
            Strategy::Segmented(plan) => plan,
            Strategy::SingleJob => panic!("expected a segmented plan"),
        }
    }

    #[test]
    fn test_small_or_short_inputs_are_single_jobs() {
        let settings = ConversionSettings::default();
        for (duration, size) in [
            (0.0, 100 * MIB),
            (15.0, 100 * MIB),
            (600.0, 5 * MIB),
            (600.0, 1024),
            (10.0, 1024),
        ] {
            assert_eq!(
                plan(duration, size, &settings),
                Strategy::SingleJob,
                "duration {duration}, size {size}"
            );
        }
    }

    #[test]
    fn test_segment_count_is_ceiling() {
        let settings = ConversionSettings::default();
        for (duration, expected) in [(16.0, 2), (30.0, 2), (31.0, 3), (45.0, 3), (3600.0, 240)] {
            let plan = segments(plan(duration, 6 * MIB, &settings));
            assert_eq!(plan.len(), expected, "duration {duration}");
        }
    }

    #[test]
    fn test_forty_seconds_six_mib() {
        let plan = segments(plan(40.0, 6 * MIB, &ConversionSettings::default()));
        let bounds: Vec<(f64, f64)> = plan
            .segments
            .iter()
            .map(|s| (s.start_offset, s.duration))
            .collect();
        assert_eq!(bounds, vec![(0.0, 15.0), (15.0, 15.0), (30.0, 10.0)]);
        assert_eq!(plan.segments[2].output_name, "t_segment_2.mp4");
        assert_eq!(
            plan.segments[2].command.window(),
            Some(TimeWindow {
                start: 30.0,
                duration: 10.0
            })
        );
    }

    #[test]
    fn test_segments_are_contiguous_and_exhaustive() {
        for duration in [16.0, 29.0, 47.0, 121.0, 1000.0] {
            let plan = segments(plan(duration, 50 * MIB, &ConversionSettings::default()));
            for pair in plan.segments.windows(2) {
                assert_eq!(pair[0].start_offset + pair[0].duration, pair[1].start_offset);
                assert_eq!(pair[0].index + 1, pair[1].index);
            }
            let last = plan.segments.last().unwrap();
            assert_eq!(last.start_offset + last.duration, duration);
            assert!(plan.segments.iter().all(|s| s.duration > 0.0));
        }
    }

    #[test]
    fn test_trim_window_is_segmented_from_trim_start() {
        let settings = ConversionSettings {
            trim_start: 10.0,
            trim_end: 50.0,
            ..Default::default()
        };
        let plan = segments(plan(45.0, 20 * MIB, &settings));
        assert_eq!(plan.total_duration, 35.0);
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.segments[1].command.window(),
            Some(TimeWindow {
                start: 25.0,
                duration: 15.0
            })
        );

        let short_trim = ConversionSettings {
            trim_start: 0.0,
            trim_end: 12.0,
            ..Default::default()
        };
        assert_eq!(plan_single(&short_trim), Strategy::SingleJob);
    }

    #[test]
    fn test_fractional_trim_has_no_sliver_segment() {
        let settings = ConversionSettings {
            trim_start: 2.2,
            trim_end: 32.2,
            ..Default::default()
        };
        let plan = segments(plan(100.0, 20 * MIB, &settings));
        assert_eq!(plan.total_duration, 30.0);
        assert_eq!(plan.len(), 2);
        let last = &plan.segments[1].command.args()[..4];
        assert_eq!(last, ["-ss", "17.2", "-t", "15"]);
        assert!(plan.segments.iter().all(|s| s.duration >= 0.001));
    }

    #[test]
    fn test_sub_millisecond_remainder_is_dropped() {
        let plan = segments(plan(30.0004, 20 * MIB, &ConversionSettings::default()));
        assert_eq!(plan.total_duration, 30.0);
        assert_eq!(plan.len(), 2);
    }

    fn plan_single(settings: &ConversionSettings) -> Strategy {
        plan(300.0, 20 * MIB, settings)
    }

    #[test]
    fn test_presets_ignore_trim_and_emit_mp4_segments() {
        let settings = ConversionSettings {
            trim_start: 0.0,
            trim_end: 5.0,
            preset: PresetProfile::Twitter,
            ..Default::default()
        };
        let plan = segments(plan(31.0, 20 * MIB, &settings));
        assert_eq!(plan.len(), 3);
        assert!(plan.segments[0].output_name.ends_with(".mp4"));
    }
}
