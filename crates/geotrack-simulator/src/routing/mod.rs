//! Route acquisition from an external routing service.
//!
//! [`RouteProvider`] performs one attempt; [`fetch_route`] wraps it with
//! per-attempt timeouts and backoff.

use std::sync::Arc;

use async_trait::async_trait;
use geotrack_domain::{Position, Route};
use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

pub mod osrm;
pub mod retry;

pub use osrm::OsrmClient;
pub use retry::{RetryPolicy, backoff_delay, fetch_route};

/// One point-to-point routing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: Position,
    pub end: Position,
    /// Movement profile, e.g. `driving`, `walking`, `cycling`
    pub profile: String,
}

/// Location the routing service snapped an input coordinate to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnappedWaypoint {
    pub name: Option<String>,
    pub location: Position,
}

/// A decoded route plus the provider's estimates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutePlan {
    pub route: Route,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub waypoints: Vec<SnappedWaypoint>,
}

impl RoutePlan {
    pub fn from_route(route: Route) -> Self {
        Self {
            route,
            ..Self::default()
        }
    }
}

/// Single-attempt routing backend.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Issue one request. Retries and timeouts are the caller's concern.
    async fn fetch(&self, request: &RouteRequest) -> Result<RoutePlan, RoutingError>;
}

/// Shared handle to a routing backend.
pub type SharedRouteProvider = Arc<dyn RouteProvider>;
