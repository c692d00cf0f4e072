//! Route-following simulator.
//!
//! Fetches one route between two points and moves along it at a fixed
//! speed, one step per tick:
//!
//! ```text
//!  Idle ──setup()──► Ready ──start()──► Running ──last waypoint──► Finished
//!    │                 │                   │
//!    └── fetch fails ──┴─► Failed          └──stop()──► Stopped
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use geotrack_domain::geo;
use geotrack_domain::{EventBus, Position, Route, SimulatorEvent, TimedPosition};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::base::SimulatorCore;
use crate::error::{Result, SimulatorError};
use crate::routing::{RetryPolicy, RouteRequest, SharedRouteProvider, fetch_route};

// =============================================================================
// OPTIONS
// =============================================================================

/// Movement and routing parameters of a route simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOptions {
    /// Routing profile, e.g. `driving`
    pub profile: String,
    /// Ground speed in meters per second
    pub speed_mps: f64,
    /// Time between two ticks
    pub update_interval: Duration,
    pub retry: RetryPolicy,
    /// Jump back to the first waypoint instead of finishing
    pub loop_route: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            profile: "driving".to_string(),
            speed_mps: 10.0,
            update_interval: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            loop_route: false,
        }
    }
}

impl RouteOptions {
    /// Meters covered by one tick.
    pub fn step_m(&self) -> f64 {
        self.speed_mps * self.update_interval.as_secs_f64()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.speed_mps.is_finite() || self.speed_mps <= 0.0 {
            return Err(SimulatorError::InvalidConfig(format!(
                "speed must be positive, got {}",
                self.speed_mps
            )));
        }
        if self.update_interval.is_zero() {
            return Err(SimulatorError::InvalidConfig(
                "update interval must be non-zero".into(),
            ));
        }
        if self.profile.trim().is_empty() {
            return Err(SimulatorError::InvalidConfig("routing profile is empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle of a route simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Idle,
    Ready,
    Running,
    Finished,
    Stopped,
    Failed,
}

impl SimulatorState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SimulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Engine {
    state: SimulatorState,
    route: Route,
    index: usize,
    remaining_m: f64,
    cursor: Position,
    /// Bumped by `stop()` so a fetch still in flight is discarded
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

/// What one tick produced. Published after the engine lock is released.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Tick {
    Moved(Position),
    Looped(Position),
    Arrived(Position),
    /// Already standing on the last waypoint
    Completed,
    Done,
}

// =============================================================================
// SIMULATOR
// =============================================================================

struct RouteInner {
    core: SimulatorCore,
    start: Position,
    end: Position,
    options: RouteOptions,
    provider: SharedRouteProvider,
    engine: Mutex<Engine>,
}

impl Drop for RouteInner {
    fn drop(&mut self) {
        let engine = self.engine.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(ticker) = engine.ticker.take() {
            ticker.abort();
        }
    }
}

/// Moves a point from `start` to `end` along a fetched route.
///
/// Cloning yields another handle to the same simulator.
#[derive(Clone)]
pub struct RouteSimulator {
    inner: Arc<RouteInner>,
}

impl fmt::Debug for RouteSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSimulator")
            .field("id", &self.id())
            .field("start", &self.inner.start)
            .field("end", &self.inner.end)
            .field("state", &self.state())
            .finish()
    }
}

impl RouteSimulator {
    pub fn new(
        start: Position,
        end: Position,
        options: RouteOptions,
        provider: SharedRouteProvider,
    ) -> Self {
        Self {
            inner: Arc::new(RouteInner {
                core: SimulatorCore::new("RouteSimulator"),
                start,
                end,
                options,
                provider,
                engine: Mutex::new(Engine {
                    state: SimulatorState::Idle,
                    route: Route::empty(),
                    index: 0,
                    remaining_m: 0.0,
                    cursor: start,
                    generation: 0,
                    ticker: None,
                }),
            }),
        }
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.inner.engine()
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
        self.engine().state
    }

    /// The fetched route. Empty before setup and for identical endpoints.
    pub fn route(&self) -> Route {
        self.engine().route.clone()
    }

    pub fn current_position(&self) -> Option<TimedPosition> {
        self.inner.core.position()
    }

    pub fn options(&self) -> &RouteOptions {
        &self.inner.options
    }

    /// Acquire the route.
    ///
    /// Identical endpoints need no route: the position is set once and
    /// the simulator becomes ready without a network call. A failed fetch
    /// publishes a single error notification and leaves the simulator
    /// [`SimulatorState::Failed`].
    pub async fn setup(&self) -> Result<()> {
        let core = &self.inner.core;
        let (start, end) = (self.inner.start, self.inner.end);

        let generation = {
            let mut engine = self.engine();
            if engine.state == SimulatorState::Running {
                return Err(SimulatorError::NotReady {
                    state: engine.state,
                    operation: "set up",
                });
            }
            if start == end {
                engine.state = SimulatorState::Ready;
                engine.route = Route::empty();
                engine.cursor = start;
                None
            } else {
                Some(engine.generation)
            }
        };

        let Some(generation) = generation else {
            info!(parent: core.span(), "Start equals destination, no route needed");
            core.set_position(start);
            return Ok(());
        };

        info!(
            parent: core.span(),
            from = ?start,
            to = ?end,
            profile = %self.inner.options.profile,
            "Preparing to start"
        );

        let request = RouteRequest {
            start,
            end,
            profile: self.inner.options.profile.clone(),
        };
        let fetched = fetch_route(
            self.inner.provider.as_ref(),
            &request,
            &self.inner.options.retry,
        )
        .await;

        let mut engine = self.engine();
        if engine.generation != generation {
            debug!(parent: core.span(), "Simulator stopped during route fetch, discarding result");
            return Ok(());
        }

        match fetched {
            Ok(plan) => {
                info!(
                    parent: core.span(),
                    points = plan.route.len(),
                    distance_m = ?plan.distance_m,
                    duration_s = ?plan.duration_s,
                    "Route ready"
                );
                engine.state = SimulatorState::Ready;
                engine.route = plan.route;
                Ok(())
            }
            Err(err) => {
                engine.state = SimulatorState::Failed;
                engine.route = Route::empty();
                drop(engine);
                warn!(parent: core.span(), error = %err, "Route unavailable");
                core.publish_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Begin moving. Only legal once [`setup`](Self::setup) made the
    /// simulator ready.
    pub fn start(&self) -> Result<()> {
        let core = &self.inner.core;

        let route = {
            let mut engine = self.engine();
            if engine.state != SimulatorState::Ready {
                return Err(SimulatorError::NotReady {
                    state: engine.state,
                    operation: "start",
                });
            }
            if engine.route.is_empty() {
                None
            } else {
                engine.index = 0;
                engine.remaining_m = 0.0;
                engine.cursor = engine.route.first().unwrap_or(self.inner.start);
                engine.state = SimulatorState::Running;
                Some(engine.route.clone())
            }
        };

        let Some(route) = route else {
            if core.position().is_none() {
                core.set_position(self.inner.start);
            }
            return Ok(());
        };

        let first = route.first().unwrap_or(self.inner.start);
        core.publish_route(route);
        core.set_position(first);

        let mut engine = self.engine();
        if engine.state == SimulatorState::Running && engine.ticker.is_none() {
            info!(parent: core.span(), "Starting simulation");
            let weak = Arc::downgrade(&self.inner);
            engine.ticker = Some(tokio::spawn(run_ticks(
                weak,
                self.inner.options.update_interval,
            )));
        }
        Ok(())
    }

    /// Cancel the tick timer. Always legal and idempotent. A route fetch
    /// still in flight completes and is discarded.
    pub fn stop(&self) {
        let mut engine = self.engine();
        engine.generation = engine.generation.wrapping_add(1);
        if let Some(ticker) = engine.ticker.take() {
            ticker.abort();
        }
        if matches!(
            engine.state,
            SimulatorState::Idle | SimulatorState::Ready | SimulatorState::Running
        ) {
            engine.state = SimulatorState::Stopped;
            debug!(parent: self.inner.core.span(), "Simulator stopped");
        }
    }
}

impl RouteInner {
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance one step. Returns `false` once the tick loop should end.
    fn tick(&self) -> bool {
        let outcome = self.advance();
        let core = &self.core;

        match outcome {
            Tick::Moved(position) => {
                core.set_position(position);
                true
            }
            Tick::Looped(position) => {
                debug!(parent: core.span(), "Looping back to route start");
                core.set_position(position);
                true
            }
            Tick::Arrived(position) => {
                core.set_position(position);
                info!(parent: core.span(), "Route completed, stopping simulator");
                core.publish_finished();
                false
            }
            Tick::Completed => {
                info!(parent: core.span(), "Route completed, stopping simulator");
                core.publish_finished();
                false
            }
            Tick::Done => false,
        }
    }

    fn advance(&self) -> Tick {
        let step = self.options.step_m();
        let mut engine = self.engine();

        if engine.state != SimulatorState::Running || engine.route.is_empty() {
            engine.ticker = None;
            return Tick::Done;
        }

        let last = engine.route.len() - 1;
        if engine.index >= last {
            if self.options.loop_route && last > 0 {
                let first = engine.route.points()[0];
                engine.index = 0;
                engine.remaining_m = 0.0;
                engine.cursor = first;
                return Tick::Looped(first);
            }
            engine.state = SimulatorState::Finished;
            engine.ticker = None;
            return Tick::Completed;
        }

        let current = engine.route.points()[engine.index];
        let next = engine.route.points()[engine.index + 1];

        if engine.remaining_m <= 0.0 {
            engine.remaining_m = geo::distance(&current, &next);
        }

        if step >= engine.remaining_m {
            // Overshoot past the waypoint is dropped, not carried over
            engine.index += 1;
            engine.remaining_m = 0.0;
            engine.cursor = next;

            if engine.index >= last && !self.options.loop_route {
                engine.state = SimulatorState::Finished;
                engine.ticker = None;
                return Tick::Arrived(next);
            }
            return Tick::Moved(next);
        }

        let bearing = geo::bearing(&engine.cursor, &next);
        let moved = geo::destination(&engine.cursor, step, bearing);
        engine.remaining_m -= step;
        engine.cursor = moved;
        Tick::Moved(moved)
    }
}

async fn run_ticks(simulator: Weak<RouteInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(simulator) = simulator.upgrade() else {
            break;
        };
        if !simulator.tick() {
            break;
        }
    }
}
