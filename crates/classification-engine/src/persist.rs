//! Background storage appends
//!
//! Classified readings are appended in arrival order by a single worker so a
//! slow or failing store never holds up classification.

use alerting::{retry_with_timeout, RetryPolicy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::{ReadingRecord, ReadingStore, StorageError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::counters::EngineCounters;

/// Producer side of the append queue
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<ReadingRecord>,
    counters: Arc<EngineCounters>,
    degraded: Arc<AtomicBool>,
}

impl PersistHandle {
    /// Queue a record; `false` when it had to be dropped
    pub fn enqueue(&self, record: ReadingRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "queue closed",
                };
                warn!("Dropping storage append: {}", reason);
                self.counters.record_storage_failure();
                self.degraded.store(true, Ordering::Relaxed);
                false
            }
        }
    }

    /// Whether the last append attempt failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Consumer side of the append queue
pub struct PersistWorker {
    rx: mpsc::Receiver<ReadingRecord>,
    store: Arc<dyn ReadingStore>,
    policy: RetryPolicy,
    counters: Arc<EngineCounters>,
    degraded: Arc<AtomicBool>,
}

pub fn persist_queue(
    store: Arc<dyn ReadingStore>,
    policy: RetryPolicy,
    capacity: usize,
    counters: Arc<EngineCounters>,
) -> (PersistHandle, PersistWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let degraded = Arc::new(AtomicBool::new(false));
    (
        PersistHandle {
            tx,
            counters: Arc::clone(&counters),
            degraded: Arc::clone(&degraded),
        },
        PersistWorker {
            rx,
            store,
            policy,
            counters,
            degraded,
        },
    )
}

impl PersistWorker {
    /// Append records until shutdown; records already queued are flushed first
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Storage worker started ({})", self.store.backend());

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    record = self.rx.recv() => match record {
                        Some(record) => self.append(record).await,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        self.rx.close();
        let flush_policy = RetryPolicy {
            max_retries: 0,
            ..self.policy
        };
        while let Ok(record) = self.rx.try_recv() {
            self.append_with(&flush_policy, record).await;
        }
        info!("Storage worker stopped");
    }

    async fn append(&self, record: ReadingRecord) {
        let policy = self.policy;
        self.append_with(&policy, record).await;
    }

    async fn append_with(&self, policy: &RetryPolicy, record: ReadingRecord) {
        let result = retry_with_timeout(
            policy,
            || {
                let store = Arc::clone(&self.store);
                let record = record.clone();
                async move { store.append(&record).await }
            },
            |d| StorageError::Timeout(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        )
        .await;

        match result {
            Ok(()) => {
                debug!("Stored reading {} @ {}", record.reading.node_id(), record.reading.timestamp());
                self.degraded.store(false, Ordering::Relaxed);
            }
            Err(exhausted) => {
                warn!(
                    "Storage append for {} failed after {} attempts: {}",
                    record.reading.node_id(),
                    exhausted.attempts,
                    exhausted.last_error
                );
                self.counters.record_storage_failure();
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
    }
}
