//! SQLite Store

use async_trait::async_trait;
use reading_validator::{normalize, RawReading, Reading};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::{ReadingRecord, ReadingStore, StorageError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    value REAL,
    scenario TEXT,
    classifications TEXT NOT NULL
)";

const NODE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_readings_node ON readings (node_id, id)";

/// Reading store backed by a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `url`, e.g. `sqlite://readings.db`
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Each in-memory connection is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query(NODE_INDEX).execute(&pool).await?;

        info!("Opened SQLite reading store at {}", url);
        Ok(Self { pool })
    }

    fn decode(row: &SqliteRow) -> Result<Reading, StorageError> {
        let raw = RawReading {
            timestamp: Some(row.try_get("timestamp")?),
            node_id: Some(row.try_get("node_id")?),
            value: row
                .try_get::<Option<f64>, _>("value")?
                .map(serde_json::Value::from),
            scenario: row.try_get("scenario")?,
        };
        normalize(raw).map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn append(&self, record: &ReadingRecord) -> Result<(), StorageError> {
        let classifications = serde_json::to_string(&record.classifications)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let reading = &record.reading;

        sqlx::query(
            "INSERT INTO readings (node_id, timestamp, timestamp_ms, value, scenario, classifications)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.node_id())
        .bind(reading.timestamp().as_str())
        .bind(reading.timestamp().millis())
        .bind(reading.value())
        .bind(reading.scenario())
        .bind(classifications)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_recent(
        &self,
        node_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = match node_id {
            Some(node) => {
                sqlx::query(
                    "SELECT node_id, timestamp, value, scenario FROM readings
                     WHERE node_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(node)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT node_id, timestamp, value, scenario FROM readings
                     ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::decode).collect()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed SQLite reading store");
    }
}
