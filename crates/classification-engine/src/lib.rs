//! Classification Engine
//!
//! Wires the stateless classifier stages to per-node history, alert
//! obligations and the storage and dispatch collaborators.

mod config;
mod counters;
mod engine;
mod node;
mod persist;
mod summary;

pub use config::{ConfigError, EngineConfig};
pub use counters::{CountersSnapshot, EngineCounters};
pub use engine::ValidationEngine;
pub use node::{NodeState, NodeStats};
pub use persist::{persist_queue, PersistHandle, PersistWorker};
pub use summary::{ClassificationSummary, SummaryStatus};
