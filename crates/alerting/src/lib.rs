//! Alerting System
//!
//! Turns classification results into at-most-once alert obligations per
//! node and anomaly kind, and delivers them through a bounded queue with
//! timeout and retry.

mod backoff;
mod dispatcher;
mod manager;
mod mqtt;
mod obligation;
mod worker;

pub use backoff::{retry_with_timeout, RetryExhausted, RetryPolicy};
pub use dispatcher::{AlertDispatcher, DispatchError, IdempotencyLedger, LogDispatcher};
pub use manager::{AlertConfig, AlertDecision, AlertManager};
pub use mqtt::{MqttConfig, MqttDispatcher};
pub use obligation::{AlertEvent, AlertObligation};
pub use worker::{dispatch_queue, DeliveryFailure, DeliveryLog, DispatchHandle, DispatchJob, DispatchWorker};
