//! Alert Obligations

use chrono::{DateTime, SecondsFormat, Utc};
use reading_validator::{AnomalyKind, Severity};
use serde::{Deserialize, Serialize};

/// The record that a node/kind currently warrants exactly one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertObligation {
    pub node_id: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    /// Event time of the reading that opened the obligation
    pub first_seen: DateTime<Utc>,
    /// Further alerts for this node/kind are suppressed until then
    pub suppressed_until: DateTime<Utc>,
    /// Rationale of the triggering classification
    pub rationale: String,
    /// Per-node opening order, distinguishes obligations opened at the same instant
    #[serde(default)]
    pub generation: u64,
}

impl AlertObligation {
    /// Key a dispatcher uses to recognise a retried delivery
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.node_id,
            self.kind,
            self.first_seen.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.generation
        )
    }

    /// Whether the suppression window is still open at `now`
    pub fn is_suppressing(&self, now: DateTime<Utc>) -> bool {
        now < self.suppressed_until
    }
}

/// State change produced by the alert manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "alert", rename_all = "snake_case")]
pub enum AlertEvent {
    Raised(AlertObligation),
    Resolved(AlertObligation),
}

impl AlertEvent {
    pub fn alert(&self) -> &AlertObligation {
        match self {
            AlertEvent::Raised(a) | AlertEvent::Resolved(a) => a,
        }
    }
}
