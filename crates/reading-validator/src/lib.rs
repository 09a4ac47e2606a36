//! Reading Validation and Classification
//!
//! Normalizes raw gas-concentration payloads into canonical readings and provides
//! the stateless classifier stages: threshold-based outlier detection and
//! missing-value remediation.

mod classification;
mod error;
mod missing;
mod normalizer;
mod outlier;
mod reading;

pub use classification::{AnomalyKind, ClassificationResult, Remediation, Severity};
pub use error::{MalformedReadingError, ThresholdError, UnresolvableMissingValueError};
pub use missing::{MissingValuePolicy, MissingValueResolver};
pub use normalizer::{normalize, normalize_json};
pub use outlier::{OutlierClassifier, Thresholds};
pub use reading::{RawReading, Reading, Timestamp};
