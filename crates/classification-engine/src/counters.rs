//! Cross-node counters

use reading_validator::{AnomalyKind, Severity};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide counters, mirrored to the metrics registry
#[derive(Debug, Default)]
pub struct EngineCounters {
    readings: AtomicU64,
    rejected: AtomicU64,
    anomalies: AtomicU64,
    alerts_fired: AtomicU64,
    storage_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub readings: u64,
    pub rejected: u64,
    pub anomalies: u64,
    pub alerts_fired: u64,
    pub storage_failures: u64,
}

impl EngineCounters {
    pub fn record_reading(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("methane_readings_total").increment(1);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("methane_readings_rejected_total").increment(1);
    }

    pub fn record_classification(&self, kind: AnomalyKind, severity: Severity) {
        if kind != AnomalyKind::Normal {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(
            "methane_classifications_total",
            "kind" => kind.as_str(),
            "severity" => severity.as_str()
        )
        .increment(1);
    }

    pub fn record_alert(&self, kind: AnomalyKind) {
        self.alerts_fired.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("methane_alerts_fired_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("methane_storage_failures_total").increment(1);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            readings: self.readings.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }
}
