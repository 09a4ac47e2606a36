//! In-Memory Repository

use async_trait::async_trait;
use reading_validator::Reading;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{ReadingRecord, ReadingStore, StorageError};

/// Default retention (records across all nodes)
const DEFAULT_MAX_RECORDS: usize = 100_000;

/// Repository keeping the most recent records in memory
pub struct Repository {
    /// Classified readings, oldest first
    records: Mutex<VecDeque<ReadingRecord>>,
    /// Retention limit
    max_records: usize,
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_RECORDS)
    }

    /// Create a repository that keeps at most `max_records` records
    pub fn with_retention(max_records: usize) -> Self {
        info!("Creating in-memory repository (retention {})", max_records);
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(10_000))),
            max_records: max_records.max(1),
        }
    }

    /// Get total record count
    pub fn count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<ReadingRecord>>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadingStore for Repository {
    async fn append(&self, record: &ReadingRecord) -> Result<(), StorageError> {
        let mut records = self.lock()?;

        // Enforce retention
        while records.len() >= self.max_records {
            records.pop_front();
        }

        records.push_back(record.clone());
        debug!("Stored reading from {}", record.reading.node_id());
        Ok(())
    }

    async fn query_recent(
        &self,
        node_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>, StorageError> {
        let records = self.lock()?;

        Ok(records
            .iter()
            .rev()
            .filter(|r| node_id.map_or(true, |id| r.reading.node_id() == id))
            .take(limit)
            .map(|r| r.reading.clone())
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
