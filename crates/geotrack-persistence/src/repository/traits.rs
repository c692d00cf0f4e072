//! # Repository Traits
//!
//! Narrow write interface of the position archive. Implementations can be
//! swapped for different backends (DuckDB, mock, etc.)

use std::sync::Arc;

use async_trait::async_trait;
use geotrack_domain::TimedPosition;
use uuid::Uuid;

use crate::error::Result;

/// One archived position: `(entity_id, latitude, longitude, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRecord {
    pub entity_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// Unix milliseconds
    pub timestamp_ms: i64,
}

impl PositionRecord {
    pub fn from_timed(entity_id: Uuid, position: &TimedPosition) -> Self {
        Self {
            entity_id,
            latitude: position.latitude(),
            longitude: position.longitude(),
            timestamp_ms: position.timestamp_ms(),
        }
    }
}

/// Append-only store of entity positions.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Append a single record
    async fn insert(&self, record: &PositionRecord) -> Result<()>;

    /// Append records in one transaction, returning how many were written
    async fn insert_batch(&self, records: &[PositionRecord]) -> Result<usize>;

    /// Positions of one entity, oldest first
    async fn history(&self, entity_id: Uuid, limit: Option<i64>) -> Result<Vec<PositionRecord>>;

    /// Total number of archived records
    async fn count(&self) -> Result<u64>;
}

/// Shared handle to any repository implementation.
pub type SharedPositionRepository = Arc<dyn PositionRepository>;
