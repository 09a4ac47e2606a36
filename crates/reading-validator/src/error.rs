//! Validation Error Types

use thiserror::Error;

/// Reasons a raw payload cannot become a canonical reading
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedReadingError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Timestamp text that is not ISO-8601
    #[error("Invalid timestamp {0:?}: expected ISO-8601")]
    InvalidTimestamp(String),

    /// Value that cannot be read as a number
    #[error("value {0} is not a number")]
    NotANumber(String),

    /// NaN or infinite value
    #[error("value {0} is not finite")]
    NonFinite(f64),

    /// Concentrations cannot be negative
    #[error("value {0} is negative")]
    Negative(f64),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

/// No neighbouring reading was available to remediate a missing value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no neighbouring reading with a value for node {node_id} around {timestamp}")]
pub struct UnresolvableMissingValueError {
    pub node_id: String,
    pub timestamp: String,
}

/// Threshold configuration that would make classification meaningless
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdError {
    #[error("{field} must be finite and non-negative, got {value}")]
    InvalidBound { field: &'static str, value: f64 },

    #[error("emergency_ppm ({emergency}) must be greater than baseline_max ({baseline})")]
    Inverted { baseline: f64, emergency: f64 },
}
