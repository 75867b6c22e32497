//! Progress reporting from engine instances and its aggregation into one
//! overall percentage.

use std::collections::HashMap;
use tokio::sync::mpsc;

/// Engine instance a progress event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressSource {
    /// The orchestrator's own engine (single-job conversions)
    Primary,
    /// A pool worker encoding the segment with this index
    Segment(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub source: ProgressSource,
    /// Completion of the current command, clamped to `0.0..=1.0`
    pub ratio: f64,
}

/// Sending half of a progress stream. Cloning is cheap; a sink created with
/// [`ProgressSink::noop`] drops every event.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    source: ProgressSource,
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(source: ProgressSource, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            source,
            tx: Some(tx),
        }
    }

    pub fn noop() -> Self {
        Self {
            source: ProgressSource::Primary,
            tx: None,
        }
    }

    /// Same channel, different source tag
    pub fn with_source(&self, source: ProgressSource) -> Self {
        Self {
            source,
            tx: self.tx.clone(),
        }
    }

    pub fn report(&self, ratio: f64) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching anymore.
            let _ = tx.send(ProgressEvent {
                source: self.source,
                ratio: ratio.clamp(0.0, 1.0),
            });
        }
    }
}

/// Folds per-source events into an overall completion ratio.
///
/// Segments are weighted by their duration, so a short trailing segment
/// moves the total less than a full one.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    weights: HashMap<ProgressSource, f64>,
    ratios: HashMap<ProgressSource, f64>,
    total_weight: f64,
}

impl ProgressAggregator {
    /// Aggregator for a single-job run
    pub fn single() -> Self {
        Self::weighted([(ProgressSource::Primary, 1.0)])
    }

    /// Aggregator over segments, given as `(index, duration_seconds)`
    pub fn for_segments(segments: impl IntoIterator<Item = (usize, f64)>) -> Self {
        Self::weighted(
            segments
                .into_iter()
                .map(|(index, duration)| (ProgressSource::Segment(index), duration)),
        )
    }

    fn weighted(weights: impl IntoIterator<Item = (ProgressSource, f64)>) -> Self {
        let weights: HashMap<_, _> = weights
            .into_iter()
            .map(|(source, weight)| (source, weight.max(0.0)))
            .collect();
        let total_weight = weights.values().sum();
        Self {
            weights,
            ratios: HashMap::new(),
            total_weight,
        }
    }

    /// Record an event and return the new overall ratio. Events from unknown
    /// sources are ignored and ratios never move backwards.
    pub fn update(&mut self, event: ProgressEvent) -> f64 {
        if self.weights.contains_key(&event.source) {
            let entry = self.ratios.entry(event.source).or_insert(0.0);
            *entry = entry.max(event.ratio.clamp(0.0, 1.0));
        }
        self.overall()
    }

    pub fn complete(&mut self, source: ProgressSource) -> f64 {
        self.update(ProgressEvent { source, ratio: 1.0 })
    }

    pub fn overall(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let done: f64 = self
            .ratios
            .iter()
            .map(|(source, ratio)| ratio * self.weights.get(source).copied().unwrap_or(0.0))
            .sum();
        (done / self.total_weight).clamp(0.0, 1.0)
    }
}
