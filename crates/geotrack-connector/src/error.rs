//! # Connector Error Types

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Invalid connector url: {0}")]
    InvalidUrl(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] geotrack_persistence::PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<tungstenite::Error> for ConnectorError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown connector '{connector}' referenced by vehicle {vehicle}")]
    UnknownConnector { vehicle: String, connector: String },

    #[error("Duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;
