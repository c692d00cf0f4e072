//! Endless random trips inside a bounding box.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geotrack_domain::{BoundingBox, EventBus, Position, SimulatorEvent, TimedPosition};
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::leg::{LegSlot, run_leg, stop_current};
use super::{DelayRange, seeded_rng};
use crate::base::SimulatorCore;
use crate::error::{Result, SimulatorError};
use crate::route::{RouteOptions, SimulatorState};
use crate::routing::SharedRouteProvider;

/// Parameters of the random-route behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomRouteOptions {
    /// Area destinations are drawn from
    pub area: BoundingBox,
    /// Pause between two trips
    pub delay: DelayRange,
    pub route: RouteOptions,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl RandomRouteOptions {
    pub fn new(area: BoundingBox) -> Self {
        Self {
            area,
            delay: DelayRange::new(1, 50),
            route: RouteOptions::default(),
            seed: None,
        }
    }
}

struct RandomInner {
    core: SimulatorCore,
    options: RandomRouteOptions,
    provider: SharedRouteProvider,
    rng: Mutex<StdRng>,
    state: Mutex<SimulatorState>,
    task: Mutex<Option<JoinHandle<()>>>,
    leg: LegSlot,
}

/// Drives one trip after another to uniformly random destinations,
/// pausing a random delay between trips. Each trip starts where the
/// previous one ended.
#[derive(Clone)]
pub struct RandomRouteSimulator {
    inner: Arc<RandomInner>,
}

impl std::fmt::Debug for RandomRouteSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomRouteSimulator")
            .field("id", &self.inner.core.id())
            .field("area", &self.inner.options.area)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RandomRouteSimulator {
    pub fn new(options: RandomRouteOptions, provider: SharedRouteProvider) -> Self {
        let rng = seeded_rng(options.seed);
        Self {
            inner: Arc::new(RandomInner {
                core: SimulatorCore::new("RandomRouteSimulator"),
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

    pub fn start(&self) -> Result<()> {
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

        info!(parent: self.inner.core.span(), "Starting simulation");
        let inner = Arc::clone(&self.inner);
        *lock(&self.inner.task) = Some(tokio::spawn(async move { inner.run().await }));
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

impl RandomInner {
    fn random_point(&self) -> Position {
        self.options.area.sample(&mut *lock(&self.rng))
    }

    async fn run(self: Arc<Self>) {
        let span = self.core.span();

        loop {
            let start = self
                .core
                .position()
                .map_or_else(|| self.random_point(), |p| p.position);
            let end = self.random_point();

            info!(parent: span, from = ?start, to = ?end, "Starting new route");
            if let Err(err) = run_leg(
                &self.core,
                &self.leg,
                start,
                end,
                &self.options.route,
                &self.provider,
            )
            .await
            {
                error!(parent: span, error = %err, "Route leg failed, ending random trips");
                self.core.publish_error(err.to_string());
                *lock(&self.state) = SimulatorState::Failed;
                break;
            }

            let delay = self.options.delay.sample(&mut *lock(&self.rng));
            info!(
                parent: span,
                wait_secs = delay.as_secs(),
                "Route finished, waiting before next route"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoutingError;
    use crate::test_helpers::{EventRecorder, ScriptedProvider, StraightLineProvider};
    use geotrack_domain::NotificationKind;
    use std::time::Duration;

    fn area() -> BoundingBox {
        BoundingBox::from_corners(Position::new(50.730, 7.090), Position::new(50.735, 7.100))
    }

    fn options() -> RandomRouteOptions {
        RandomRouteOptions {
            delay: DelayRange::new(1, 3),
            route: RouteOptions {
                speed_mps: 200.0,
                ..RouteOptions::default()
            },
            seed: Some(42),
            ..RandomRouteOptions::new(area())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_consecutive_legs_inside_area() {
        let sim = RandomRouteSimulator::new(options(), Arc::new(StraightLineProvider));
        let recorder = EventRecorder::attach(sim.events());

        sim.setup().await.unwrap();
        sim.start().unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        sim.stop();

        let routes: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SimulatorEvent::Route(route) => Some(route),
                _ => None,
            })
            .collect();
        assert!(routes.len() >= 2, "expected several legs, got {}", routes.len());

        // Every leg begins where the previous one ended
        for pair in routes.windows(2) {
            assert_eq!(pair[0].last(), pair[1].first());
        }
        // Great-circle legs may bulge a hair past the box edges
        let margin = BoundingBox::from_corners(
            Position::new(50.7299, 7.0899),
            Position::new(50.7351, 7.1001),
        );
        for p in recorder.positions() {
            assert!(margin.contains(&p), "{p:?} left the area");
        }
        assert_eq!(sim.state(), SimulatorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_leg_ends_the_cycle() {
        let provider = ScriptedProvider::new(
            (0..4).map(|_| Err(RoutingError::Status(500))).collect(),
        );
        let sim = RandomRouteSimulator::new(options(), Arc::new(provider));
        let recorder = EventRecorder::attach(sim.events());

        sim.setup().await.unwrap();
        sim.start().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(recorder.count(NotificationKind::Error), 1);
        assert!(recorder.positions().is_empty());
        assert_eq!(sim.state(), SimulatorState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_setup() {
        let sim = RandomRouteSimulator::new(options(), Arc::new(StraightLineProvider));
        assert!(matches!(
            sim.start(),
            Err(SimulatorError::NotReady { state: SimulatorState::Idle, .. })
        ));
    }
}
