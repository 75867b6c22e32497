//! Joins segment outputs back into one file.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::pool::{TaskOutcome, TaskResult};
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssemblyError {
    #[error("segment {index} failed: {error}")]
    SegmentFailed {
        index: usize,
        #[source]
        error: EngineError,
    },

    #[error("segment {0} was cancelled")]
    SegmentCancelled(usize),

    #[error("segment {0} is missing from the results")]
    MissingSegment(usize),

    #[error("segment {0} was reported more than once")]
    DuplicateSegment(usize),

    #[error("remuxing segments failed: {0}")]
    Remux(#[source] EngineError),
}

/// How segment outputs are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReassemblyMode {
    /// Byte concatenation. Only valid for containers that tolerate it
    /// (e.g. MPEG-TS style streams); fragmented MP4 players typically stop
    /// after the first segment.
    #[default]
    Concat,
    /// Container level join with the engine's concat demuxer
    Remux,
}

impl FromStr for ReassemblyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concat" => Ok(ReassemblyMode::Concat),
            "remux" => Ok(ReassemblyMode::Remux),
            other => Err(format!("unknown reassembly mode '{other}'")),
        }
    }
}

/// Put results in segment order, checking every index `0..expected`
/// appears exactly once. The first failed or cancelled segment (by index)
/// is returned as the error.
pub fn order_by_index(
    results: Vec<TaskResult>,
    expected: usize,
) -> Result<Vec<Vec<u8>>, AssemblyError> {
    let mut ordered: Vec<Option<TaskOutcome>> = (0..expected).map(|_| None).collect();
    for result in results {
        let slot = ordered
            .get_mut(result.segment_index)
            .ok_or(AssemblyError::MissingSegment(result.segment_index))?;
        if slot.is_some() {
            return Err(AssemblyError::DuplicateSegment(result.segment_index));
        }
        *slot = Some(result.outcome);
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Some(TaskOutcome::Success { bytes }) => Ok(bytes),
            Some(TaskOutcome::Failure { error }) => {
                Err(AssemblyError::SegmentFailed { index, error })
            }
            Some(TaskOutcome::Cancelled) => Err(AssemblyError::SegmentCancelled(index)),
            None => Err(AssemblyError::MissingSegment(index)),
        })
        .collect()
}

/// Concatenate ordered buffers into one allocation of exactly their total size
pub fn assemble<B: AsRef<[u8]>>(segments: &[B]) -> Vec<u8> {
    let total = segments.iter().map(|s| s.as_ref().len()).sum();
    let mut joined = Vec::with_capacity(total);
    for segment in segments {
        joined.extend_from_slice(segment.as_ref());
    }
    joined
}

/// Join segments inside `engine` with the concat demuxer, copying streams
/// without re-encoding. Every entry written here is removed again.
pub async fn remux(
    engine: &mut dyn Engine,
    segments: &[Vec<u8>],
    extension: &str,
    tag: &str,
) -> Result<Vec<u8>, AssemblyError> {
    let names: Vec<String> = (0..segments.len())
        .map(|i| format!("{tag}_part_{i}.{extension}"))
        .collect();
    let list_name = format!("{tag}_concat.txt");
    let output_name = format!("{tag}_joined.{extension}");

    let result = async {
        for (name, bytes) in names.iter().zip(segments) {
            engine.write_input(name, bytes).await?;
        }
        let list: String = names.iter().map(|n| format!("file '{n}'\n")).collect();
        engine.write_input(&list_name, list.as_bytes()).await?;

        let args: Vec<String> = [
            "-f", "concat", "-safe", "0", "-i", &list_name, "-c", "copy", "-y", &output_name,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        debug!("Remuxing {} segments into {}", segments.len(), output_name);
        engine.exec(&args, &ProgressSink::noop()).await?;
        engine.read_output(&output_name).await
    }
    .await;

    for name in names.iter().chain([&list_name, &output_name]) {
        if let Err(e) = engine.delete_entry(name).await {
            warn!("Failed to remove {} after remux: {}", name, e);
        }
    }

    result.map_err(AssemblyError::Remux)
}
