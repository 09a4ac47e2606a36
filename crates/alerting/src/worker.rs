//! Bounded dispatch queue
//!
//! Classification never waits on a dispatcher. Alert events are handed to a
//! bounded channel and delivered by a single worker with timeout and retry.
//! Anything that cannot be delivered ends up in the [`DeliveryLog`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::backoff::{retry_with_timeout, RetryPolicy};
use crate::dispatcher::{AlertDispatcher, DispatchError};
use crate::obligation::{AlertEvent, AlertObligation};

const FAILURE_HISTORY: usize = 256;

/// Unit of work for the dispatch worker
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchJob {
    Notify(AlertObligation),
    Resolve(AlertObligation),
}

impl DispatchJob {
    pub fn alert(&self) -> &AlertObligation {
        match self {
            DispatchJob::Notify(a) | DispatchJob::Resolve(a) => a,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DispatchJob::Notify(_) => "raised",
            DispatchJob::Resolve(_) => "resolved",
        }
    }
}

impl From<AlertEvent> for DispatchJob {
    fn from(event: AlertEvent) -> Self {
        match event {
            AlertEvent::Raised(a) => DispatchJob::Notify(a),
            AlertEvent::Resolved(a) => DispatchJob::Resolve(a),
        }
    }
}

/// An alert event that was never delivered
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    pub idempotency_key: String,
    pub event: &'static str,
    pub alert: AlertObligation,
    pub attempts: u32,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Delivery outcomes shared between the queue handle and the worker
#[derive(Debug, Default)]
pub struct DeliveryLog {
    failures: Mutex<VecDeque<DeliveryFailure>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryLog {
    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, job: &DispatchJob, attempts: u32, err: &DispatchError) {
        error!(
            key = %job.alert().idempotency_key(),
            attempts,
            "Alert delivery failed: {}",
            err
        );
        metrics::counter!("methane_delivery_failures_total").increment(1);
        self.failed.fetch_add(1, Ordering::Relaxed);

        let failure = DeliveryFailure {
            idempotency_key: job.alert().idempotency_key(),
            event: job.label(),
            alert: job.alert().clone(),
            attempts,
            error: err.to_string(),
            recorded_at: Utc::now(),
        };
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if failures.len() >= FAILURE_HISTORY {
            failures.pop_front();
        }
        failures.push_back(failure);
    }

    /// Recent failures, oldest first
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        match self.failures.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Producer side of the dispatch queue
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchJob>,
    log: Arc<DeliveryLog>,
}

impl DispatchHandle {
    /// Queue a job without waiting; a full or closed queue is recorded as a failure
    pub fn enqueue(&self, job: DispatchJob) -> Result<(), DispatchError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.log.record_failure(&job, 0, &DispatchError::QueueFull);
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.log.record_failure(&job, 0, &DispatchError::Cancelled);
                Err(DispatchError::Cancelled)
            }
        }
    }

    /// Record a job that will not be dispatched because the engine is stopping
    pub fn cancel(&self, job: DispatchJob) {
        self.log.record_failure(&job, 0, &DispatchError::Cancelled);
    }

    pub fn log(&self) -> &Arc<DeliveryLog> {
        &self.log
    }
}

/// Consumer side of the dispatch queue
pub struct DispatchWorker {
    rx: mpsc::Receiver<DispatchJob>,
    dispatcher: Arc<dyn AlertDispatcher>,
    policy: RetryPolicy,
    log: Arc<DeliveryLog>,
}

/// Create a dispatch queue of `capacity` jobs
pub fn dispatch_queue(
    dispatcher: Arc<dyn AlertDispatcher>,
    policy: RetryPolicy,
    capacity: usize,
) -> (DispatchHandle, DispatchWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let log = Arc::new(DeliveryLog::default());
    (
        DispatchHandle {
            tx,
            log: Arc::clone(&log),
        },
        DispatchWorker {
            rx,
            dispatcher,
            policy,
            log,
        },
    )
}

impl DispatchWorker {
    /// Deliver jobs until shutdown is signalled or every handle is dropped.
    ///
    /// A delivery in progress when shutdown arrives runs to completion; jobs
    /// still queued are recorded as cancelled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Dispatch worker started ({})", self.dispatcher.name());

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    job = self.rx.recv() => match job {
                        Some(job) => self.deliver(job).await,
                        None => break,
                    },
                }
            }
        }

        self.rx.close();
        let mut cancelled = 0;
        while let Ok(job) = self.rx.try_recv() {
            self.log.record_failure(&job, 0, &DispatchError::Cancelled);
            cancelled += 1;
        }
        if cancelled > 0 {
            warn!("Dispatch worker cancelled {} queued jobs", cancelled);
        }
        info!("Dispatch worker stopped");
    }

    async fn deliver(&self, job: DispatchJob) {
        let key = job.alert().idempotency_key();
        debug!("Dispatching {} {} via {}", job.label(), key, self.dispatcher.name());

        let result = retry_with_timeout(
            &self.policy,
            || {
                let dispatcher = Arc::clone(&self.dispatcher);
                let job = job.clone();
                async move {
                    match &job {
                        DispatchJob::Notify(a) => dispatcher.notify(a).await,
                        DispatchJob::Resolve(a) => dispatcher.resolve(a).await,
                    }
                }
            },
            DispatchError::Timeout,
        )
        .await;

        match result {
            Ok(()) => {
                self.log.record_delivered();
                metrics::counter!("methane_alerts_delivered_total", "event" => job.label())
                    .increment(1);
            }
            Err(exhausted) => {
                self.log
                    .record_failure(&job, exhausted.attempts, &exhausted.last_error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reading_validator::{AnomalyKind, Severity};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct MockDispatcher {
        calls: AtomicU32,
        fail_first: u32,
        delay: Duration,
    }

    impl MockDispatcher {
        fn new(fail_first: u32, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
                delay,
            })
        }
    }

    #[async_trait]
    impl AlertDispatcher for MockDispatcher {
        async fn notify(&self, _alert: &AlertObligation) -> Result<(), DispatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.fail_first {
                Err(DispatchError::Failed("unreachable".to_string()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    fn alert(node: &str) -> AlertObligation {
        let now = Utc::now();
        AlertObligation {
            node_id: node.to_string(),
            kind: AnomalyKind::Outlier,
            severity: Severity::Critical,
            first_seen: now,
            suppressed_until: now + chrono::Duration::minutes(5),
            rationale: "test".to_string(),
            generation: 1,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_delivered() {
        let mock = MockDispatcher::new(2, Duration::ZERO);
        let (handle, worker) = dispatch_queue(mock.clone(), policy(), 8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(stop_rx));

        handle.enqueue(DispatchJob::Notify(alert("CH4_001"))).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.log().delivered(), 1);
        assert_eq!(handle.log().failed(), 0);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_recorded() {
        let mock = MockDispatcher::new(u32::MAX, Duration::from_secs(10));
        let (handle, worker) = dispatch_queue(mock.clone(), policy(), 8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(worker.run(stop_rx));

        handle.enqueue(DispatchJob::Notify(alert("CH4_001"))).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let failures = handle.log().failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert!(failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_full_queue_is_recorded() {
        let mock = MockDispatcher::new(0, Duration::ZERO);
        let (handle, _worker) = dispatch_queue(mock, policy(), 1);

        handle.enqueue(DispatchJob::Notify(alert("CH4_001"))).unwrap();
        let err = handle
            .enqueue(DispatchJob::Notify(alert("CH4_002")))
            .unwrap_err();

        assert_eq!(err, DispatchError::QueueFull);
        assert_eq!(handle.log().failures()[0].alert.node_id, "CH4_002");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queued_jobs() {
        let mock = MockDispatcher::new(0, Duration::from_millis(500));
        let (handle, worker) = dispatch_queue(mock.clone(), policy(), 8);
        let (stop_tx, stop_rx) = watch::channel(false);

        handle.enqueue(DispatchJob::Notify(alert("CH4_001"))).unwrap();
        handle.enqueue(DispatchJob::Notify(alert("CH4_002"))).unwrap();
        handle.enqueue(DispatchJob::Notify(alert("CH4_003"))).unwrap();

        let task = tokio::spawn(worker.run(stop_rx));
        // Let the first delivery start, then stop
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.log().delivered(), 1);
        let cancelled = handle.log().failures();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|f| f.error.contains("cancelled")));

        let err = handle
            .enqueue(DispatchJob::Notify(alert("CH4_004")))
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
    }
}
