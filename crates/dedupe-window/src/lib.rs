//! Dedupe Window
//!
//! Bounded per-node history of recent readings and the temporal duplicate
//! detector built on top of it. Memory per node is fixed by the window
//! capacity regardless of ingestion rate.

mod buffer;
mod deduplicator;

pub use buffer::{SlidingWindow, DEFAULT_CAPACITY};
pub use deduplicator::{DedupeConfig, TemporalDeduplicator};

use thiserror::Error;

/// Window construction errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("window capacity must be at least 1")]
    ZeroCapacity,
    #[error("value tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),
}
