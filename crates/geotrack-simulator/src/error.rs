//! Simulator error types.

use std::time::Duration;

use thiserror::Error;

use crate::route::SimulatorState;

/// Errors from a single routing attempt or a whole retry sequence.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Routing request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Routing request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Routing server rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Routing server returned {0}")]
    Status(u16),

    #[error("Malformed routing response: {0}")]
    Decode(String),

    #[error("No route returned")]
    EmptyRoute,

    #[error("Invalid routing url: {0}")]
    InvalidUrl(String),

    #[error("Route unavailable after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<RoutingError>,
    },
}

impl From<serde_json::Error> for RoutingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Simulator errors.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    RouteUnavailable(#[from] RoutingError),

    #[error("Cannot {operation} while simulator is {state}")]
    NotReady {
        state: SimulatorState,
        operation: &'static str,
    },

    #[error("No home location configured")]
    MissingHomeLocation,

    #[error("Route leg failed: {0}")]
    LegFailed(String),

    #[error("Invalid simulator configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for simulator operations.
pub type Result<T> = std::result::Result<T, SimulatorError>;
