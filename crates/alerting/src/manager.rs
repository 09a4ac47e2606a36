//! Alert Manager Implementation
//!
//! One manager per node. It keeps at most one active [`AlertObligation`] per
//! anomaly kind and runs on event time: its clock is the latest reading
//! timestamp seen. A reading older than the clock is out of order and leaves
//! every obligation as it is.

use chrono::{DateTime, Utc};
use reading_validator::{AnomalyKind, ClassificationResult, Reading, Severity};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::obligation::{AlertEvent, AlertObligation};

/// Kinds that can carry an obligation, in evaluation order
const ALERT_KINDS: [AnomalyKind; 3] = [
    AnomalyKind::Outlier,
    AnomalyKind::Duplicate,
    AnomalyKind::Missing,
];

/// Alert configuration
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Suppression window of an obligation
    pub cooldown: Duration,
    /// Whether missing readings open obligations
    pub alert_on_missing: bool,
    /// Whether closed obligations produce resolved events
    pub emit_resolved: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            alert_on_missing: false,
            emit_resolved: true,
        }
    }
}

/// Outcome of evaluating one reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertDecision {
    pub events: Vec<AlertEvent>,
    /// Alert-worthy results absorbed by an open obligation
    pub suppressed: usize,
    /// Reading was older than the node clock and not applied
    pub stale: bool,
}

impl AlertDecision {
    /// Newly opened obligations
    pub fn raised(&self) -> impl Iterator<Item = &AlertObligation> {
        self.events.iter().filter_map(|e| match e {
            AlertEvent::Raised(a) => Some(a),
            AlertEvent::Resolved(_) => None,
        })
    }

    /// Closed obligations
    pub fn resolved(&self) -> impl Iterator<Item = &AlertObligation> {
        self.events.iter().filter_map(|e| match e {
            AlertEvent::Resolved(a) => Some(a),
            AlertEvent::Raised(_) => None,
        })
    }
}

/// Alert obligation state for one node
#[derive(Debug)]
pub struct AlertManager {
    node_id: String,
    config: AlertConfig,
    cooldown: chrono::Duration,
    active: HashMap<AnomalyKind, AlertObligation>,
    clock: Option<DateTime<Utc>>,
    fire_count: usize,
}

impl AlertManager {
    /// Create a manager for `node_id`
    pub fn new(node_id: impl Into<String>, config: AlertConfig) -> Self {
        let cooldown =
            chrono::Duration::from_std(config.cooldown).unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            node_id: node_id.into(),
            config,
            cooldown,
            active: HashMap::new(),
            clock: None,
            fire_count: 0,
        }
    }

    /// Merge one reading's classification results into the obligation state
    pub fn evaluate(&mut self, reading: &Reading, results: &[ClassificationResult]) -> AlertDecision {
        let at = reading.timestamp().instant();
        if self.clock.is_some_and(|clock| at < clock) {
            debug!(
                "Out-of-order reading for {} at {}, obligations unchanged",
                self.node_id,
                reading.timestamp()
            );
            return AlertDecision {
                stale: true,
                ..Default::default()
            };
        }
        self.clock = Some(at);
        let now = at;
        let mut decision = AlertDecision::default();

        for kind in ALERT_KINDS {
            if let Some((severity, rationale)) = self.verdict(kind, reading, results) {
                self.apply(kind, severity, rationale, now, &mut decision);
            }
        }

        decision
    }

    /// Severity per kind; `None` when the kind was not evaluated for this reading
    fn verdict<'r>(
        &self,
        kind: AnomalyKind,
        reading: &Reading,
        results: &'r [ClassificationResult],
    ) -> Option<(Severity, &'r str)> {
        let evaluated = match kind {
            AnomalyKind::Outlier => !reading.is_missing(),
            AnomalyKind::Missing => self.config.alert_on_missing,
            _ => true,
        };
        if !evaluated {
            return None;
        }

        let worst = results
            .iter()
            .filter(|r| r.kind == kind)
            .max_by_key(|r| r.severity);

        Some(match worst {
            Some(r) => (r.severity, r.rationale.as_str()),
            None => (Severity::None, ""),
        })
    }

    fn apply(
        &mut self,
        kind: AnomalyKind,
        severity: Severity,
        rationale: &str,
        now: DateTime<Utc>,
        decision: &mut AlertDecision,
    ) {
        // Cooldown elapsed: the obligation lapses without a resolution
        if self.active.get(&kind).is_some_and(|a| !a.is_suppressing(now)) {
            debug!("Alert window elapsed for {}/{}", self.node_id, kind);
            self.active.remove(&kind);
        }

        let current = self.active.get(&kind).map(|a| a.severity);
        match (current, severity) {
            (None, Severity::None) => {}
            (Some(_), Severity::None) => self.close(kind, decision),
            (None, _) => self.open(kind, severity, rationale, now, decision),
            (Some(active), _) if active == severity => {
                debug!("Alert suppressed for {}/{} ({})", self.node_id, kind, severity);
                decision.suppressed += 1;
            }
            (Some(active), _) => {
                if active > severity {
                    self.close(kind, decision);
                } else {
                    debug!("Escalating {}/{} from {} to {}", self.node_id, kind, active, severity);
                    self.active.remove(&kind);
                }
                self.open(kind, severity, rationale, now, decision);
            }
        }
    }

    fn open(
        &mut self,
        kind: AnomalyKind,
        severity: Severity,
        rationale: &str,
        now: DateTime<Utc>,
        decision: &mut AlertDecision,
    ) {
        self.fire_count += 1;
        let alert = AlertObligation {
            node_id: self.node_id.clone(),
            kind,
            severity,
            first_seen: now,
            suppressed_until: now
                .checked_add_signed(self.cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            rationale: rationale.to_string(),
            generation: self.fire_count as u64,
        };
        info!(
            "Alert raised: {}/{} {} (count: {})",
            self.node_id, kind, severity, self.fire_count
        );
        self.active.insert(kind, alert.clone());
        decision.events.push(AlertEvent::Raised(alert));
    }

    fn close(&mut self, kind: AnomalyKind, decision: &mut AlertDecision) {
        if let Some(alert) = self.active.remove(&kind) {
            info!("Alert resolved: {}/{} {}", self.node_id, kind, alert.severity);
            if self.config.emit_resolved {
                decision.events.push(AlertEvent::Resolved(alert));
            }
        }
    }

    /// Currently active obligation for `kind`
    pub fn active(&self, kind: AnomalyKind) -> Option<&AlertObligation> {
        self.active.get(&kind)
    }

    /// All active obligations
    pub fn active_alerts(&self) -> impl Iterator<Item = &AlertObligation> {
        self.active.values()
    }

    /// Number of obligations ever opened
    pub fn fire_count(&self) -> usize {
        self.fire_count
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reading_validator::{normalize, RawReading};

    fn reading(ts: &str, value: Option<f64>) -> Reading {
        normalize(RawReading::new(ts, "CH4_001", value)).unwrap()
    }

    fn result(r: &Reading, kind: AnomalyKind, severity: Severity) -> ClassificationResult {
        ClassificationResult::new(r, kind, severity, format!("{} {}", kind, severity))
    }

    fn manager() -> AlertManager {
        AlertManager::new("CH4_001", AlertConfig::default())
    }

    #[test]
    fn test_first_alert_fires_then_suppresses() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        let d1 = m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);
        assert_eq!(d1.raised().count(), 1);

        let r2 = reading("2025-10-22T20:41:00Z", Some(6.0));
        let d2 = m.evaluate(&r2, &[result(&r2, AnomalyKind::Outlier, Severity::Warning)]);
        assert_eq!(d2.raised().count(), 0);
        assert_eq!(d2.suppressed, 1);
        assert_eq!(m.fire_count(), 1);
    }

    #[test]
    fn test_normal_reading_closes_obligation() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);

        let r2 = reading("2025-10-22T20:41:00Z", Some(0.1));
        let d2 = m.evaluate(&r2, &[result(&r2, AnomalyKind::Normal, Severity::None)]);
        assert_eq!(d2.resolved().count(), 1);
        assert!(m.active(AnomalyKind::Outlier).is_none());

        let r3 = reading("2025-10-22T20:42:00Z", Some(5.0));
        let d3 = m.evaluate(&r3, &[result(&r3, AnomalyKind::Outlier, Severity::Warning)]);
        assert_eq!(d3.raised().count(), 1);
    }

    #[test]
    fn test_cooldown_elapse_refires() {
        let mut m = AlertManager::new(
            "CH4_001",
            AlertConfig {
                cooldown: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);

        let r2 = reading("2025-10-22T20:40:59Z", Some(5.0));
        assert_eq!(
            m.evaluate(&r2, &[result(&r2, AnomalyKind::Outlier, Severity::Warning)])
                .raised()
                .count(),
            0
        );

        let r3 = reading("2025-10-22T20:41:00Z", Some(5.0));
        let d3 = m.evaluate(&r3, &[result(&r3, AnomalyKind::Outlier, Severity::Warning)]);
        assert_eq!(d3.raised().count(), 1);
        assert_eq!(d3.resolved().count(), 0);
    }

    #[test]
    fn test_escalation_supersedes_without_resolving() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);

        let r2 = reading("2025-10-22T20:41:00Z", Some(80.0));
        let d2 = m.evaluate(&r2, &[result(&r2, AnomalyKind::Outlier, Severity::Critical)]);
        assert_eq!(d2.raised().count(), 1);
        assert_eq!(d2.resolved().count(), 0);
        assert_eq!(
            m.active(AnomalyKind::Outlier).map(|a| a.severity),
            Some(Severity::Critical)
        );
        assert_eq!(m.active_alerts().count(), 1);
    }

    #[test]
    fn test_deescalation_resolves_critical_and_opens_warning() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:40:00Z", Some(80.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Critical)]);

        let r2 = reading("2025-10-22T20:41:00Z", Some(5.0));
        let d2 = m.evaluate(&r2, &[result(&r2, AnomalyKind::Outlier, Severity::Warning)]);
        let resolved: Vec<_> = d2.resolved().collect();
        let raised: Vec<_> = d2.raised().collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].severity, Severity::Critical);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].severity, Severity::Warning);
    }

    #[test]
    fn test_missing_reading_leaves_outlier_untouched() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);

        let gap = reading("2025-10-22T20:41:00Z", None);
        let d = m.evaluate(&gap, &[result(&gap, AnomalyKind::Missing, Severity::Warning)]);
        assert!(d.events.is_empty());
        assert!(m.active(AnomalyKind::Outlier).is_some());
        assert!(m.active(AnomalyKind::Missing).is_none());
    }

    #[test]
    fn test_missing_alerts_when_enabled() {
        let mut m = AlertManager::new(
            "CH4_001",
            AlertConfig {
                alert_on_missing: true,
                ..Default::default()
            },
        );

        let gap = reading("2025-10-22T20:41:00Z", None);
        let d = m.evaluate(&gap, &[result(&gap, AnomalyKind::Missing, Severity::Warning)]);
        assert_eq!(d.raised().next().map(|a| a.kind), Some(AnomalyKind::Missing));

        let back = reading("2025-10-22T20:42:00Z", Some(0.1));
        let d = m.evaluate(&back, &[result(&back, AnomalyKind::Normal, Severity::None)]);
        assert_eq!(d.resolved().next().map(|a| a.kind), Some(AnomalyKind::Missing));
    }

    #[test]
    fn test_late_reading_does_not_rewind_clock() {
        let mut m = AlertManager::new(
            "CH4_001",
            AlertConfig {
                cooldown: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let r1 = reading("2025-10-22T20:45:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);

        let late = reading("2025-10-22T20:30:00Z", Some(5.0));
        let d = m.evaluate(&late, &[result(&late, AnomalyKind::Outlier, Severity::Warning)]);
        assert!(d.stale);
        assert_eq!(d.suppressed, 0);

        let first_seen = m.active(AnomalyKind::Outlier).unwrap().first_seen;
        assert_eq!(first_seen, r1.timestamp().instant());
    }

    #[test]
    fn test_out_of_order_normal_keeps_obligation_open() {
        let mut m = manager();

        let r1 = reading("2025-10-22T20:45:00Z", Some(80.0));
        let d1 = m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Critical)]);
        assert_eq!(d1.raised().count(), 1);

        let stale = reading("2025-10-22T20:30:00Z", Some(0.1));
        let d2 = m.evaluate(&stale, &[result(&stale, AnomalyKind::Normal, Severity::None)]);
        assert!(d2.stale);
        assert!(d2.events.is_empty());
        assert!(m.active(AnomalyKind::Outlier).is_some());

        let r3 = reading("2025-10-22T20:46:00Z", Some(80.0));
        let d3 = m.evaluate(&r3, &[result(&r3, AnomalyKind::Outlier, Severity::Critical)]);
        assert_eq!(d3.raised().count(), 0);
        assert_eq!(d3.suppressed, 1);
        assert_eq!(m.fire_count(), 1);
    }

    #[test]
    fn test_same_instant_escalation_gets_fresh_key() {
        let mut m = manager();
        let ledger = crate::IdempotencyLedger::new(16);

        let r1 = reading("2025-10-22T20:45:00Z", Some(5.0));
        let d1 = m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);
        let warning = d1.raised().next().cloned().unwrap();

        let r2 = reading("2025-10-22T20:45:00Z", Some(80.0));
        let d2 = m.evaluate(&r2, &[result(&r2, AnomalyKind::Outlier, Severity::Critical)]);
        let critical = d2.raised().next().cloned().unwrap();

        assert_eq!(warning.first_seen, critical.first_seen);
        assert_ne!(warning.idempotency_key(), critical.idempotency_key());
        assert!(ledger.first_delivery(&warning.idempotency_key()));
        assert!(ledger.first_delivery(&critical.idempotency_key()));
    }

    #[test]
    fn test_resolved_events_can_be_silenced() {
        let mut m = AlertManager::new(
            "CH4_001",
            AlertConfig {
                emit_resolved: false,
                ..Default::default()
            },
        );

        let r1 = reading("2025-10-22T20:40:00Z", Some(5.0));
        m.evaluate(&r1, &[result(&r1, AnomalyKind::Outlier, Severity::Warning)]);
        let r2 = reading("2025-10-22T20:41:00Z", Some(0.1));
        let d = m.evaluate(&r2, &[result(&r2, AnomalyKind::Normal, Severity::None)]);
        assert!(d.events.is_empty());
        assert!(m.active(AnomalyKind::Outlier).is_none());
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut m = manager();

        let r = reading("2025-10-22T20:40:00Z", Some(5.0));
        let d = m.evaluate(
            &r,
            &[
                result(&r, AnomalyKind::Outlier, Severity::Warning),
                result(&r, AnomalyKind::Duplicate, Severity::Warning),
            ],
        );
        assert_eq!(d.raised().count(), 2);

        let d = m.evaluate(
            &r,
            &[
                result(&r, AnomalyKind::Outlier, Severity::Warning),
                result(&r, AnomalyKind::Duplicate, Severity::Warning),
            ],
        );
        assert_eq!(d.raised().count(), 0);
        assert_eq!(d.suppressed, 2);
    }
}
