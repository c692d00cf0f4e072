//! Emergency dispatch cycle.
//!
//! ```text
//!  AtStation(2) ─wait─► Responding(3) ─leg─► OnScene(4) ─hold─►
//!  AvailableOnRadio(1) ─leg home─► AtStation(2) ─► ...
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geotrack_domain::{
    BoundingBox, EventBus, Position, SimulatorEvent, TimedPosition, UnitStatus,
};
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::leg::{LegSlot, run_leg, stop_current};
use super::{DelayRange, seeded_rng};
use crate::base::SimulatorCore;
use crate::error::{Result, SimulatorError};
use crate::route::{RouteOptions, SimulatorState};
use crate::routing::SharedRouteProvider;

/// Parameters of the dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    /// Area incidents are drawn from
    pub area: BoundingBox,
    /// Station the unit starts at and returns to
    pub home: Option<Position>,
    /// Idle time at the station before the next dispatch
    pub dispatch_wait: DelayRange,
    /// Time spent at the incident
    pub on_scene: DelayRange,
    pub route: RouteOptions,
    pub seed: Option<u64>,
}

impl DispatchOptions {
    pub fn new(area: BoundingBox, home: Option<Position>) -> Self {
        Self {
            area,
            home,
            dispatch_wait: DelayRange::new(10, 200),
            on_scene: DelayRange::new(5, 300),
            route: RouteOptions::default(),
            seed: None,
        }
    }
}

struct DispatchInner {
    core: SimulatorCore,
    options: DispatchOptions,
    provider: SharedRouteProvider,
    rng: Mutex<StdRng>,
    state: Mutex<SimulatorState>,
    task: Mutex<Option<JoinHandle<()>>>,
    leg: LegSlot,
}

/// Emergency unit that waits at its station, drives to random
/// incidents, holds on scene, and returns home.
///
/// A failed leg ends the cycle for good; there is no restart.
#[derive(Clone)]
pub struct DispatchSimulator {
    inner: Arc<DispatchInner>,
}

impl std::fmt::Debug for DispatchSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSimulator")
            .field("id", &self.inner.core.id())
            .field("home", &self.inner.options.home)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DispatchSimulator {
    pub fn new(options: DispatchOptions, provider: SharedRouteProvider) -> Self {
        let rng = seeded_rng(options.seed);
        Self {
            inner: Arc::new(DispatchInner {
                core: SimulatorCore::new("DispatchSimulator"),
                options,
                provider,
                rng: Mutex::new(rng),
                state: Mutex::new(SimulatorState::Idle),
                task: Mutex::new(None),
                leg: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.inner.core.id()
    }

    pub fn core(&self) -> &SimulatorCore {
        &self.inner.core
    }

    pub fn events(&self) -> &EventBus<SimulatorEvent> {
        self.inner.core.events()
    }

    pub fn state(&self) -> SimulatorState {
        *lock(&self.inner.state)
    }

    pub fn current_position(&self) -> Option<TimedPosition> {
        self.inner.core.position()
    }

    pub async fn setup(&self) -> Result<()> {
        self.inner.options.route.validate()?;
        let mut state = lock(&self.inner.state);
        if *state == SimulatorState::Running {
            return Err(SimulatorError::NotReady {
                state: *state,
                operation: "set up",
            });
        }
        *state = SimulatorState::Ready;
        info!(parent: self.inner.core.span(), "Ready to start");
        Ok(())
    }

    /// Place the unit at its station and begin the cycle in the
    /// background. Without a home location nothing happens.
    pub fn start(&self) -> Result<()> {
        let core = &self.inner.core;
        let Some(home) = self.inner.options.home else {
            error!(parent: core.span(), "No home location configured, not starting");
            return Err(SimulatorError::MissingHomeLocation);
        };

        {
            let mut state = lock(&self.inner.state);
            if *state != SimulatorState::Ready {
                return Err(SimulatorError::NotReady {
                    state: *state,
                    operation: "start",
                });
            }
            *state = SimulatorState::Running;
        }

        info!(
            parent: core.span(),
            home_lat = home.latitude,
            home_lon = home.longitude,
            "Starting simulation at home location"
        );
        core.set_status(UnitStatus::AtStation);
        core.set_position(home);

        let inner = Arc::clone(&self.inner);
        *lock(&self.inner.task) = Some(tokio::spawn(async move { inner.run(home).await }));
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
        }
        stop_current(&self.inner.leg);
        let mut state = lock(&self.inner.state);
        if matches!(*state, SimulatorState::Ready | SimulatorState::Running) {
            *state = SimulatorState::Stopped;
        }
    }
}

impl DispatchInner {
    fn current_or(&self, fallback: Position) -> Position {
        self.core.position().map_or(fallback, |p| p.position)
    }

    async fn run(self: Arc<Self>, home: Position) {
        if let Err(err) = self.cycle(home).await {
            error!(parent: self.core.span(), error = %err, "Dispatch cycle halted");
            self.core.publish_error(err.to_string());
            *lock(&self.state) = SimulatorState::Failed;
        }
    }

    async fn cycle(&self, home: Position) -> Result<()> {
        let span = self.core.span();

        loop {
            let wait = self.options.dispatch_wait.sample(&mut *lock(&self.rng));
            info!(parent: span, wait_secs = wait.as_secs(), "Waiting for next dispatch");
            tokio::time::sleep(wait).await;

            let incident = self.options.area.sample(&mut *lock(&self.rng));
            info!(
                parent: span,
                lat = incident.latitude,
                lon = incident.longitude,
                "Dispatched to incident"
            );
            self.core.set_status(UnitStatus::Responding);
            run_leg(
                &self.core,
                &self.leg,
                self.current_or(home),
                incident,
                &self.options.route,
                &self.provider,
            )
            .await?;

            let hold = self.options.on_scene.sample(&mut *lock(&self.rng));
            self.core.set_status(UnitStatus::OnScene);
            info!(parent: span, hold_secs = hold.as_secs(), "On scene");
            tokio::time::sleep(hold).await;

            info!(parent: span, "Returning to home location");
            self.core.set_status(UnitStatus::AvailableOnRadio);
            run_leg(
                &self.core,
                &self.leg,
                self.current_or(incident),
                home,
                &self.options.route,
                &self.provider,
            )
            .await?;

            self.core.set_position(home);
            self.core.set_status(UnitStatus::AtStation);
            info!(parent: span, "Arrived at home location");
        }
    }
}
