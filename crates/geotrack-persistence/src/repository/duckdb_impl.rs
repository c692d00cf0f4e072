//! DuckDB repository implementation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use duckdb::{Connection, params};
use uuid::Uuid;

use super::traits::{PositionRecord, PositionRepository};
use crate::error::{PersistenceError, Result};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Archive location. `None` keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    pub path: Option<PathBuf>,
}

impl ArchiveConfig {
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

const SCHEMA: &str = r#"
    CREATE SEQUENCE IF NOT EXISTS positions_id_seq;

    CREATE TABLE IF NOT EXISTS positions (
        id BIGINT PRIMARY KEY DEFAULT nextval('positions_id_seq'),
        entity_id VARCHAR NOT NULL,
        latitude DOUBLE,
        longitude DOUBLE,
        "timestamp" BIGINT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_positions_entity ON positions(entity_id);
"#;

const INSERT: &str =
    r#"INSERT INTO positions (entity_id, latitude, longitude, "timestamp") VALUES (?, ?, ?, ?)"#;

/// Position archive on a single DuckDB connection. Statements run on the
/// blocking thread pool so async callers never stall the runtime.
#[derive(Clone)]
pub struct DuckDbPositionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbPositionRepository {
    /// Open the archive and create the schema if absent.
    pub fn open(config: &ArchiveConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            path = ?config.path,
            "Position archive ready"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory archive.
    pub fn in_memory() -> Result<Self> {
        Self::open(&ArchiveConfig::default())
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard: MutexGuard<'_, Connection> = conn
                .lock()
                .map_err(|_| PersistenceError::Task("archive connection poisoned".into()))?;
            op(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl PositionRepository for DuckDbPositionRepository {
    async fn insert(&self, record: &PositionRecord) -> Result<()> {
        let record = *record;
        self.with_conn(move |conn| {
            conn.execute(
                INSERT,
                params![
                    record.entity_id.to_string(),
                    record.latitude,
                    record.longitude,
                    record.timestamp_ms,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_batch(&self, records: &[PositionRecord]) -> Result<usize> {
        let records = records.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                tx.execute(
                    INSERT,
                    params![
                        record.entity_id.to_string(),
                        record.latitude,
                        record.longitude,
                        record.timestamp_ms,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(records.len())
        })
        .await
    }

    async fn history(&self, entity_id: Uuid, limit: Option<i64>) -> Result<Vec<PositionRecord>> {
        self.with_conn(move |conn| {
            let mut query = String::from(
                r#"SELECT entity_id, latitude, longitude, "timestamp"
                   FROM positions
                   WHERE entity_id = ?
                   ORDER BY "timestamp", id"#,
            );
            if let Some(limit) = limit {
                query.push_str(&format!(" LIMIT {}", limit.max(0)));
            }

            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(params![entity_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, latitude, longitude, timestamp_ms) = row?;
                records.push(PositionRecord {
                    entity_id: Uuid::parse_str(&id)?,
                    latitude,
                    longitude,
                    timestamp_ms,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or_default())
        })
        .await
    }
}
