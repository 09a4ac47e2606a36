//! Per-node history

use alerting::{AlertConfig, AlertManager};
use dedupe_window::TemporalDeduplicator;
use reading_validator::Reading;
use serde::Serialize;

/// Running aggregate over accepted values of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NodeStats {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NodeStats {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Everything the engine remembers about one node
///
/// Owned by a single writer: the engine holds it behind a per-node mutex.
#[derive(Debug)]
pub struct NodeState {
    pub(crate) dedup: TemporalDeduplicator,
    pub(crate) alerts: AlertManager,
    pub(crate) stats: NodeStats,
}

impl NodeState {
    /// `dedup` is an empty, already validated window
    pub fn new(node_id: &str, dedup: TemporalDeduplicator, alerts: AlertConfig) -> Self {
        Self {
            dedup,
            alerts: AlertManager::new(node_id, alerts),
            stats: NodeStats::default(),
        }
    }

    /// Window contents, oldest first
    pub fn recent(&self) -> Vec<Reading> {
        self.dedup.recent().cloned().collect()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let mut stats = NodeStats::default();
        assert_eq!(stats.mean(), None);

        stats.add(0.3);
        stats.add(5.0);
        stats.add(0.1);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(0.1));
        assert_eq!(stats.max, Some(5.0));
        assert!((stats.mean().unwrap() - 1.8).abs() < 1e-9);
    }
}
