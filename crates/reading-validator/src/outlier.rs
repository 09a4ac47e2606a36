//! Threshold-Based Outlier Classification

use serde::{Deserialize, Serialize};

use crate::classification::{AnomalyKind, ClassificationResult, Severity};
use crate::error::ThresholdError;
use crate::reading::Reading;

/// Concentration thresholds in ppm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Upper bound of the expected normal range (inclusive)
    pub baseline_max: f64,
    /// Absolute critical threshold (inclusive)
    pub emergency_ppm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            baseline_max: 10.0,
            emergency_ppm: 5000.0,
        }
    }
}

impl Thresholds {
    /// Create validated thresholds
    pub fn new(baseline_max: f64, emergency_ppm: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            baseline_max,
            emergency_ppm,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Check both bounds are usable and correctly ordered
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (field, value) in [
            ("baseline_max", self.baseline_max),
            ("emergency_ppm", self.emergency_ppm),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ThresholdError::InvalidBound { field, value });
            }
        }
        if self.emergency_ppm <= self.baseline_max {
            return Err(ThresholdError::Inverted {
                baseline: self.baseline_max,
                emergency: self.emergency_ppm,
            });
        }
        Ok(())
    }
}

/// Classifies present values against the baseline and emergency thresholds
#[derive(Debug, Clone)]
pub struct OutlierClassifier {
    thresholds: Thresholds,
}

impl OutlierClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// First match wins: emergency, then baseline, then normal
    pub fn classify_value(&self, value: f64) -> (AnomalyKind, Severity) {
        if value >= self.thresholds.emergency_ppm {
            (AnomalyKind::Outlier, Severity::Critical)
        } else if value > self.thresholds.baseline_max {
            (AnomalyKind::Outlier, Severity::Warning)
        } else {
            (AnomalyKind::Normal, Severity::None)
        }
    }

    /// Classify a reading; `None` when the value is absent
    pub fn classify(&self, reading: &Reading) -> Option<ClassificationResult> {
        let value = reading.value()?;
        let (kind, severity) = self.classify_value(value);

        let rationale = match severity {
            Severity::Critical => format!(
                "{} ppm reached emergency threshold {} ppm",
                value, self.thresholds.emergency_ppm
            ),
            Severity::Warning => format!(
                "{} ppm above baseline {} ppm",
                value, self.thresholds.baseline_max
            ),
            Severity::None => format!(
                "{} ppm within baseline {} ppm",
                value, self.thresholds.baseline_max
            ),
        };

        Some(ClassificationResult::new(reading, kind, severity, rationale))
    }
}

impl Default for OutlierClassifier {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
