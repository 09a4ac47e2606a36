//! Validation Engine
//!
//! Runs every reading through normalization, the classifier stages, the
//! node's duplicate window and its alert state, then hands alert events and
//! the classified reading to the background workers.

use alerting::{
    dispatch_queue, AlertDispatcher, AlertObligation, DeliveryFailure, DeliveryLog, DispatchHandle, DispatchJob,
};
use dedupe_window::TemporalDeduplicator;
use reading_validator::{
    normalize, normalize_json, MalformedReadingError, MissingValuePolicy, MissingValueResolver,
    OutlierClassifier, RawReading, Reading,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::{ReadingRecord, ReadingStore, StorageError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::counters::{CountersSnapshot, EngineCounters};
use crate::node::{NodeState, NodeStats};
use crate::persist::{persist_queue, PersistHandle};
use crate::summary::ClassificationSummary;

/// Multi-node classification engine
///
/// Distinct nodes are processed in parallel; readings of the same node are
/// serialized by that node's mutex.
pub struct ValidationEngine {
    config: EngineConfig,
    outlier: OutlierClassifier,
    resolver: MissingValueResolver,
    window_template: TemporalDeduplicator,
    nodes: RwLock<HashMap<String, Arc<Mutex<NodeState>>>>,
    store: Arc<dyn ReadingStore>,
    dispatch: DispatchHandle,
    persist: PersistHandle,
    counters: Arc<EngineCounters>,
    stopping: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ValidationEngine {
    /// Validate `config` and spawn the dispatch and storage workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn ReadingStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let outlier = OutlierClassifier::new(config.thresholds()?);
        let window_template = TemporalDeduplicator::new(&config.dedupe())?;
        let counters = Arc::new(EngineCounters::default());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatch, dispatch_worker) = dispatch_queue(
            dispatcher,
            config.dispatch_retry(),
            config.dispatch_queue_capacity,
        );
        let (persist, persist_worker) = persist_queue(
            Arc::clone(&store),
            config.storage_retry(),
            config.dispatch_queue_capacity,
            Arc::clone(&counters),
        );

        let workers = vec![
            tokio::spawn(dispatch_worker.run(shutdown_rx.clone())),
            tokio::spawn(persist_worker.run(shutdown_rx)),
        ];

        info!(
            "Validation engine started (baseline {} ppm, emergency {} ppm, policy {:?}, store {})",
            config.baseline_max,
            config.emergency_ppm,
            config.missing_value_policy,
            store.backend()
        );

        Ok(Self {
            resolver: MissingValueResolver::new(config.missing_value_policy),
            config,
            outlier,
            window_template,
            nodes: RwLock::new(HashMap::new()),
            store,
            dispatch,
            persist,
            counters,
            stopping: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(workers),
        })
    }

    /// Normalize and classify one raw payload
    pub async fn ingest(&self, raw: RawReading) -> ClassificationSummary {
        match normalize(raw) {
            Ok(reading) => self.classify(reading).await,
            Err(e) => self.reject(e.to_string()),
        }
    }

    /// Normalize and classify one JSON payload
    pub async fn ingest_json(&self, payload: serde_json::Value) -> ClassificationSummary {
        match normalize_json(payload) {
            Ok(reading) => self.classify(reading).await,
            Err(e) => self.reject(e.to_string()),
        }
    }

    /// Decode a request body as JSON, then ingest it
    pub async fn ingest_body(&self, body: &[u8]) -> ClassificationSummary {
        match serde_json::from_slice(body) {
            Ok(payload) => self.ingest_json(payload).await,
            Err(e) => self.reject(MalformedReadingError::InvalidFormat(e.to_string()).to_string()),
        }
    }

    fn reject(&self, reason: String) -> ClassificationSummary {
        warn!("Rejected reading: {}", reason);
        self.counters.record_rejected();
        ClassificationSummary::rejected(reason)
    }

    /// Classify a normalized reading
    pub async fn classify(&self, reading: Reading) -> ClassificationSummary {
        self.counters.record_reading();
        let node = self.node(reading.node_id()).await;
        let mut state = node.lock().await;
        let mut storage_degraded = false;

        let mut results = Vec::with_capacity(2);
        if reading.is_missing() {
            let neighbours = match self.stored_neighbours(reading.node_id()).await {
                Ok(mut stored) => {
                    stored.extend(state.recent());
                    stored
                }
                Err(e) => {
                    warn!("Neighbour lookup failed, using in-memory window: {}", e);
                    self.counters.record_storage_failure();
                    storage_degraded = true;
                    state.recent()
                }
            };
            results.extend(self.resolver.classify(&reading, &neighbours));
        } else {
            results.extend(self.outlier.classify(&reading));
        }
        results.extend(state.dedup.observe(&reading));

        match reading.value() {
            Some(value) => state.stats.add(value),
            None if self.resolver.policy() == MissingValuePolicy::Interpolate => {
                let imputed = results
                    .iter()
                    .filter_map(|r| r.remediation.as_ref())
                    .find_map(|r| r.value());
                if let Some(value) = imputed {
                    state.stats.add(value);
                }
            }
            None => {}
        }

        let decision = state.alerts.evaluate(&reading, &results);
        let fired: Vec<AlertObligation> = decision.raised().cloned().collect();

        // Enqueue while holding the node lock so a node's events stay ordered
        let stopping = self.stopping.load(Ordering::SeqCst);
        for event in decision.events {
            let job = DispatchJob::from(event);
            if stopping {
                self.dispatch.cancel(job);
            } else {
                // Failures are recorded in the delivery log
                let _ = self.dispatch.enqueue(job);
            }
        }

        let record = ReadingRecord {
            reading,
            classifications: results.clone(),
        };
        if !self.persist.enqueue(record) {
            storage_degraded = true;
        }
        drop(state);

        for result in &results {
            self.counters.record_classification(result.kind, result.severity);
        }
        for alert in &fired {
            self.counters.record_alert(alert.kind);
        }
        debug!(
            "Classified {} reading(s), {} alert(s) fired",
            results.len(),
            fired.len()
        );

        ClassificationSummary::accepted(
            results,
            fired,
            storage_degraded || self.persist.is_degraded(),
        )
    }

    async fn node(&self, node_id: &str) -> Arc<Mutex<NodeState>> {
        if let Some(node) = self.nodes.read().await.get(node_id) {
            return Arc::clone(node);
        }

        let mut nodes = self.nodes.write().await;
        let node = nodes.entry(node_id.to_string()).or_insert_with(|| {
            info!("Tracking new node {}", node_id);
            Arc::new(Mutex::new(NodeState::new(
                node_id,
                self.window_template.clone(),
                self.config.alerts(),
            )))
        });
        Arc::clone(node)
    }

    async fn stored_neighbours(&self, node_id: &str) -> Result<Vec<Reading>, StorageError> {
        self.recent_readings(Some(node_id), self.config.neighbor_lookup_limit)
            .await
    }

    /// Most recently stored readings, bounded by the storage timeout
    pub async fn recent_readings(
        &self,
        node_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>, StorageError> {
        let timeout = self.config.storage_timeout;
        tokio::time::timeout(timeout, self.store.query_recent(node_id, limit))
            .await
            .map_err(|_| StorageError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))?
    }

    /// Active obligations across all nodes
    pub async fn active_alerts(&self) -> Vec<AlertObligation> {
        let nodes: Vec<_> = self.nodes.read().await.values().cloned().collect();
        let mut alerts = Vec::new();
        for node in nodes {
            alerts.extend(node.lock().await.alerts.active_alerts().cloned());
        }
        alerts.sort_by(|a, b| {
            a.node_id
                .cmp(&b.node_id)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        alerts
    }

    /// Recent alert events that could not be delivered
    pub fn delivery_failures(&self) -> Vec<DeliveryFailure> {
        self.dispatch.log().failures()
    }

    /// Delivery outcome totals
    pub fn delivery_log(&self) -> &DeliveryLog {
        self.dispatch.log()
    }

    pub async fn node_stats(&self, node_id: &str) -> Option<NodeStats> {
        let node = self.nodes.read().await.get(node_id).cloned()?;
        let stats = node.lock().await.stats();
        Some(stats)
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn storage_backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn storage_degraded(&self) -> bool {
        self.persist.is_degraded()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop dispatching and wait for the workers
    ///
    /// Readings classified after this point are still reported, but their
    /// alert events are recorded as cancelled instead of dispatched.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Validation engine shutting down");
        let _ = self.shutdown_tx.send(true);

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
        self.store.close().await;
        info!("Validation engine stopped");
    }
}
