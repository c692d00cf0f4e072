//! # Repository Module
//!
//! Position archive interface and its DuckDB implementation.

pub mod duckdb_impl;
pub mod traits;

pub use duckdb_impl::{ArchiveConfig, DuckDbPositionRepository};
pub use traits::{PositionRecord, PositionRepository, SharedPositionRepository};
