//! # Geotrack Simulator
//!
//! Route-following vehicle simulation.
//!
//! ## Features
//!
//! - OSRM route fetching with per-attempt timeouts and backoff
//! - Fixed-step movement along the fetched route
//! - Random-trip and emergency dispatch behaviors composed from route legs
//! - Vehicle entity re-publishing simulator notifications
//!
//! ## Usage
//!
//! ```rust,ignore
//! use geotrack_simulator::{OsrmClient, RouteOptions, RouteSimulator, Vehicle};
//!
//! let provider = Arc::new(OsrmClient::default());
//! let sim = RouteSimulator::new(start, end, RouteOptions::default(), provider);
//! let vehicle = Vehicle::new(Uuid::new_v4());
//! vehicle.setup(sim.into()).await?;
//! vehicle.start()?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod base;
pub mod behaviors;
pub mod error;
pub mod route;
pub mod routing;
pub mod simulator;
pub mod vehicle;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use base::SimulatorCore;
pub use behaviors::{
    DelayRange, DispatchOptions, DispatchSimulator, RandomRouteOptions, RandomRouteSimulator,
};
pub use error::{Result, RoutingError, SimulatorError};
pub use route::{RouteOptions, RouteSimulator, SimulatorState};
pub use routing::{
    OsrmClient, RetryPolicy, RoutePlan, RouteProvider, RouteRequest, SharedRouteProvider,
    SnappedWaypoint, fetch_route,
};
pub use simulator::Simulator;
pub use vehicle::Vehicle;
