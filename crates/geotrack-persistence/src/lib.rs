//! # Geotrack Persistence
//!
//! Durable archive for simulated positions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Archive connector (writer task)     │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │        PositionRepository (async trait)      │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │   DuckDbPositionRepository (blocking pool)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geotrack_persistence::{ArchiveConfig, DuckDbPositionRepository, PositionRepository};
//!
//! let repo = DuckDbPositionRepository::open(&ArchiveConfig::default())?;
//! repo.insert(&record).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod repository;

pub use error::{PersistenceError, Result};
pub use repository::{
    ArchiveConfig, DuckDbPositionRepository, PositionRecord, PositionRepository,
    SharedPositionRepository,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
