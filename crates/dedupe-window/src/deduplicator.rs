//! Temporal Duplicate Detection

use reading_validator::{AnomalyKind, ClassificationResult, Reading, Severity};
use std::time::Duration;
use tracing::debug;

use crate::buffer::{SlidingWindow, DEFAULT_CAPACITY};
use crate::WindowError;

/// Deduplication settings
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// Readings remembered per node
    pub window_size: usize,
    /// Readings closer together than this can be duplicates
    pub min_interval: Duration,
    /// Maximum absolute difference for two values to count as equal (ppm)
    pub value_tolerance: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_CAPACITY,
            min_interval: Duration::from_secs(5),
            value_tolerance: 1e-9,
        }
    }
}

/// Per-node duplicate detector over the last `window_size` readings
#[derive(Debug, Clone)]
pub struct TemporalDeduplicator {
    window: SlidingWindow<Reading>,
    min_interval: Duration,
    value_tolerance: f64,
}

impl TemporalDeduplicator {
    pub fn new(config: &DedupeConfig) -> Result<Self, WindowError> {
        if !config.value_tolerance.is_finite() || config.value_tolerance < 0.0 {
            return Err(WindowError::InvalidTolerance(config.value_tolerance));
        }

        Ok(Self {
            window: SlidingWindow::new(config.window_size)?,
            min_interval: config.min_interval,
            value_tolerance: config.value_tolerance,
        })
    }

    /// Classify `reading` against the window, then record it
    ///
    /// The reading is compared only with readings already in the window, so it is
    /// never its own duplicate. Recording happens whether or not it matched.
    pub fn observe(&mut self, reading: &Reading) -> Option<ClassificationResult> {
        let matched = self
            .window
            .iter()
            .rev()
            .find(|prior| self.matches(prior, reading))
            .map(|prior| prior.timestamp().clone());

        self.window.push(reading.clone());

        let original = matched?;
        debug!(
            "Duplicate on {}: {} repeats {}",
            reading.node_id(),
            reading.timestamp(),
            original
        );

        Some(ClassificationResult::new(
            reading,
            AnomalyKind::Duplicate,
            Severity::Warning,
            format!(
                "same value as reading at {} less than {:?} earlier",
                original, self.min_interval
            ),
        ))
    }

    fn matches(&self, prior: &Reading, reading: &Reading) -> bool {
        let (Some(a), Some(b)) = (prior.value(), reading.value()) else {
            return false;
        };
        let (earlier, later) = if prior.timestamp() <= reading.timestamp() {
            (prior.timestamp().instant(), reading.timestamp().instant())
        } else {
            (reading.timestamp().instant(), prior.timestamp().instant())
        };
        let gap = (later - earlier).to_std().unwrap_or(Duration::MAX);
        gap < self.min_interval && (a - b).abs() <= self.value_tolerance
    }

    /// Readings currently remembered, oldest first
    pub fn recent(&self) -> impl DoubleEndedIterator<Item = &Reading> {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    /// Total readings observed for this node
    pub fn total_observed(&self) -> usize {
        self.window.total_written()
    }
}
