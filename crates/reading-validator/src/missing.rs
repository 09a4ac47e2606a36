//! Missing-Value Remediation

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classification::{AnomalyKind, ClassificationResult, Remediation, Severity};
use crate::error::UnresolvableMissingValueError;
use crate::reading::Reading;

/// What to do with a reading whose value is absent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingValuePolicy {
    /// Estimate a replacement from temporal neighbours
    #[serde(alias = "interpolate")]
    Interpolate,
    /// Keep the gap; exclude the reading from aggregate statistics
    #[serde(alias = "drop")]
    Drop,
}

/// Classifies absent values and applies the configured remediation policy
#[derive(Debug, Clone)]
pub struct MissingValueResolver {
    policy: MissingValuePolicy,
}

impl MissingValueResolver {
    pub fn new(policy: MissingValuePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingValuePolicy {
        self.policy
    }

    /// Compute a remediation for `reading` from other readings of the same node
    ///
    /// `neighbors` may be in any order and may include other nodes and readings
    /// without values; those are ignored.
    pub fn resolve(
        &self,
        reading: &Reading,
        neighbors: &[Reading],
    ) -> Result<Remediation, UnresolvableMissingValueError> {
        if self.policy == MissingValuePolicy::Drop {
            return Ok(Remediation::Dropped);
        }

        let at = reading.timestamp().instant();
        let mut before: Option<(&Reading, f64)> = None;
        let mut after: Option<(&Reading, f64)> = None;

        for candidate in neighbors.iter().filter(|n| n.node_id() == reading.node_id()) {
            let Some(value) = candidate.value() else {
                continue;
            };
            let ts = candidate.timestamp().instant();
            if ts < at {
                if before.map_or(true, |(b, _)| ts > b.timestamp().instant()) {
                    before = Some((candidate, value));
                }
            } else if ts > at && after.map_or(true, |(a, _)| ts < a.timestamp().instant()) {
                after = Some((candidate, value));
            }
        }

        match (before, after) {
            (Some((b, v0)), Some((a, v1))) => {
                let t0 = b.timestamp().millis() as f64;
                let t1 = a.timestamp().millis() as f64;
                let t = reading.timestamp().millis() as f64;
                let fraction = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                Ok(Remediation::Interpolated {
                    value: v0 + (v1 - v0) * fraction,
                    before: b.timestamp().clone(),
                    after: a.timestamp().clone(),
                })
            }
            (Some((n, value)), None) | (None, Some((n, value))) => Ok(Remediation::CarriedForward {
                value,
                source: n.timestamp().clone(),
            }),
            (None, None) => Err(UnresolvableMissingValueError {
                node_id: reading.node_id().to_string(),
                timestamp: reading.timestamp().to_string(),
            }),
        }
    }

    /// Produce the `Missing` classification; `None` when the value is present
    pub fn classify(&self, reading: &Reading, neighbors: &[Reading]) -> Option<ClassificationResult> {
        if !reading.is_missing() {
            return None;
        }

        let remediation = self.resolve(reading, neighbors).unwrap_or_else(|e| {
            warn!("{}; remediation deferred", e);
            Remediation::Unresolvable
        });

        let rationale = match &remediation {
            Remediation::Interpolated { value, .. } => {
                format!("value absent; interpolated {:.4} ppm", value)
            }
            Remediation::CarriedForward { value, source } => {
                format!("value absent; carried {} ppm from {}", value, source)
            }
            Remediation::Dropped => "value absent; dropped by policy".to_string(),
            Remediation::Unresolvable => "value absent; no neighbour to remediate from".to_string(),
        };
        debug!("Missing value on {}: {}", reading.node_id(), rationale);

        Some(
            ClassificationResult::new(reading, AnomalyKind::Missing, Severity::Warning, rationale)
                .with_remediation(remediation),
        )
    }
}
