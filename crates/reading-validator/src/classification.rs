//! Classification Results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reading::{Reading, Timestamp};

/// What a classifier stage decided about a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    Normal,
    Outlier,
    Duplicate,
    Missing,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::Normal => "normal",
            AnomalyKind::Outlier => "outlier",
            AnomalyKind::Duplicate => "duplicate",
            AnomalyKind::Missing => "missing",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier, ordered from harmless to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    None,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Anything above `None` warrants an alert obligation
    pub fn is_alert_worthy(self) -> bool {
        self != Severity::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of missing-value remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    /// Linear interpolation between the nearest prior and next readings
    Interpolated {
        value: f64,
        before: Timestamp,
        after: Timestamp,
    },
    /// Only one neighbour was known; its value is carried over
    CarriedForward { value: f64, source: Timestamp },
    /// Excluded from aggregate statistics by policy
    Dropped,
    /// No neighbour available yet; remediation deferred
    Unresolvable,
}

impl Remediation {
    /// Replacement value, when one was computed
    pub fn value(&self) -> Option<f64> {
        match self {
            Remediation::Interpolated { value, .. } | Remediation::CarriedForward { value, .. } => {
                Some(*value)
            }
            Remediation::Dropped | Remediation::Unresolvable => None,
        }
    }
}

/// A single classifier verdict for one reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub reading: Reading,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
}

impl ClassificationResult {
    pub fn new(
        reading: &Reading,
        kind: AnomalyKind,
        severity: Severity,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            reading: reading.clone(),
            kind,
            severity,
            rationale: rationale.into(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }

    pub fn is_alert_worthy(&self) -> bool {
        self.severity.is_alert_worthy()
    }
}
