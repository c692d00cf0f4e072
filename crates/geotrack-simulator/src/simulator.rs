//! Closed set of simulator variants behind one interface.

use geotrack_domain::{EventBus, SimulatorEvent, TimedPosition};
use uuid::Uuid;

use crate::behaviors::{DispatchSimulator, RandomRouteSimulator};
use crate::error::Result;
use crate::route::{RouteSimulator, SimulatorState};

/// Any simulator a vehicle can be driven by.
#[derive(Debug, Clone)]
pub enum Simulator {
    Route(RouteSimulator),
    RandomRoute(RandomRouteSimulator),
    Dispatch(DispatchSimulator),
}

impl Simulator {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Route(_) => "RouteSimulator",
            Self::RandomRoute(_) => "RandomRouteSimulator",
            Self::Dispatch(_) => "DispatchSimulator",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Route(s) => s.id(),
            Self::RandomRoute(s) => s.id(),
            Self::Dispatch(s) => s.id(),
        }
    }

    pub fn events(&self) -> &EventBus<SimulatorEvent> {
        match self {
            Self::Route(s) => s.events(),
            Self::RandomRoute(s) => s.events(),
            Self::Dispatch(s) => s.events(),
        }
    }

    pub fn state(&self) -> SimulatorState {
        match self {
            Self::Route(s) => s.state(),
            Self::RandomRoute(s) => s.state(),
            Self::Dispatch(s) => s.state(),
        }
    }

    pub async fn setup(&self) -> Result<()> {
        match self {
            Self::Route(s) => s.setup().await,
            Self::RandomRoute(s) => s.setup().await,
            Self::Dispatch(s) => s.setup().await,
        }
    }

    pub fn start(&self) -> Result<()> {
        match self {
            Self::Route(s) => s.start(),
            Self::RandomRoute(s) => s.start(),
            Self::Dispatch(s) => s.start(),
        }
    }

    pub fn stop(&self) {
        match self {
            Self::Route(s) => s.stop(),
            Self::RandomRoute(s) => s.stop(),
            Self::Dispatch(s) => s.stop(),
        }
    }

    pub fn current_position(&self) -> Option<TimedPosition> {
        match self {
            Self::Route(s) => s.current_position(),
            Self::RandomRoute(s) => s.current_position(),
            Self::Dispatch(s) => s.current_position(),
        }
    }
}

impl From<RouteSimulator> for Simulator {
    fn from(simulator: RouteSimulator) -> Self {
        Self::Route(simulator)
    }
}

impl From<RandomRouteSimulator> for Simulator {
    fn from(simulator: RandomRouteSimulator) -> Self {
        Self::RandomRoute(simulator)
    }
}

impl From<DispatchSimulator> for Simulator {
    fn from(simulator: DispatchSimulator) -> Self {
        Self::Dispatch(simulator)
    }
}
