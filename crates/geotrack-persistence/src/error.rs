//! Persistence layer error types

use thiserror::Error;

/// Persistence layer errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl From<uuid::Error> for PersistenceError {
    fn from(err: uuid::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
