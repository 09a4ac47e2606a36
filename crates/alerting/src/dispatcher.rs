//! Alert Dispatchers

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::obligation::AlertObligation;

/// Dispatch error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Dispatch failed: {0}")]
    Failed(String),

    #[error("Dispatch queue full")]
    QueueFull,

    #[error("Dispatch cancelled by shutdown")]
    Cancelled,
}

/// Destination for alert notifications
///
/// Implementations receive at-least-once delivery: a timed-out attempt may
/// have reached the destination and will be retried with the same
/// [`AlertObligation::idempotency_key`].
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver a newly raised alert
    async fn notify(&self, alert: &AlertObligation) -> Result<(), DispatchError>;

    /// Deliver a resolution of a previously raised alert
    async fn resolve(&self, _alert: &AlertObligation) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Dispatcher name for logs
    fn name(&self) -> &'static str;
}

/// Bounded set of recently delivered idempotency keys
#[derive(Debug)]
pub struct IdempotencyLedger {
    capacity: usize,
    inner: Mutex<LedgerInner>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl IdempotencyLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Record `key`; returns `false` if it was already delivered
    pub fn first_delivery(&self, key: &str) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.keys.contains(key) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.keys.remove(&oldest);
            }
        }
        inner.order.push_back(key.to_string());
        inner.keys.insert(key.to_string());
        true
    }
}

/// Dispatcher that writes alerts to the log
#[derive(Debug)]
pub struct LogDispatcher {
    ledger: IdempotencyLedger,
}

impl LogDispatcher {
    pub fn new() -> Self {
        Self {
            ledger: IdempotencyLedger::new(1024),
        }
    }
}

impl Default for LogDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn notify(&self, alert: &AlertObligation) -> Result<(), DispatchError> {
        let key = alert.idempotency_key();
        if !self.ledger.first_delivery(&key) {
            info!("Skipping redelivery of {}", key);
            return Ok(());
        }
        warn!(
            node_id = %alert.node_id,
            kind = %alert.kind,
            severity = %alert.severity,
            key = %key,
            "ALERT: {}",
            alert.rationale
        );
        Ok(())
    }

    async fn resolve(&self, alert: &AlertObligation) -> Result<(), DispatchError> {
        info!(
            node_id = %alert.node_id,
            kind = %alert.kind,
            key = %alert.idempotency_key(),
            "Alert resolved"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
