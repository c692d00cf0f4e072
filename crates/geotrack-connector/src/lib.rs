//! # Geotrack Connector
//!
//! Delivery side of the geotrack simulator: connectors that forward
//! vehicle updates, scenario configuration, and the orchestrator that
//! wires everything together.
//!
//! ## Features
//!
//! - **WebSocket connector**: `model.update` messages with latest-value
//!   buffering while offline and backoff reconnects
//! - **Archive connector**: every position appended to DuckDB
//! - **Scenario file**: connectors and vehicles declared in JSON
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │            (scenario → connectors, vehicles)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Vehicle  ◄──  Simulator (route legs)           │
//! │                 (entity notifications)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │   WebSocketConnector    │   │      ArchiveConnector        │
//! │  (buffer + reconnect)   │   │   (writer task → DuckDB)     │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod config;
pub mod connector;
pub mod error;
pub mod orchestrator;
pub mod websocket;

pub use archive::ArchiveConnector;
pub use config::{
    ConnectorEntry, ConnectorKind, ConnectorSettings, EnvConfig, RoutingSection, ScenarioConfig,
    SimulatorBlueprint, SimulatorData, SimulatorKind, VehicleEntry,
};
pub use connector::{Attachments, Connector, SharedConnector};
pub use error::{ConfigError, ConnectorError, Result};
pub use orchestrator::Orchestrator;
pub use websocket::{ReconnectPolicy, WebSocketConfig, WebSocketConnector};

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
