//! Storage Layer
//!
//! The classification core only needs two things from storage: a best-effort
//! `append` of each classified reading and a read-only `query_recent` used for
//! missing-value neighbour lookup. [`ReadingStore`] is that seam; the in-memory
//! [`Repository`] and [`SqliteStore`] implement it.

mod repository;
mod sqlite;

pub use repository::Repository;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use reading_validator::{ClassificationResult, Reading};
use serde::Serialize;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage call timed out after {0}ms")]
    Timeout(u64),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::Unavailable(err.to_string())
            }
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

/// A classified reading as handed to storage
#[derive(Debug, Clone, Serialize)]
pub struct ReadingRecord {
    pub reading: Reading,
    pub classifications: Vec<ClassificationResult>,
}

/// Persistence collaborator
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one classified reading
    async fn append(&self, record: &ReadingRecord) -> Result<(), StorageError>;

    /// Most recently stored readings first, optionally for one node only
    async fn query_recent(
        &self,
        node_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>, StorageError>;

    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;

    /// Release connections once no more appends will arrive
    async fn close(&self) {}
}
