//! Vehicle entity.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use geotrack_domain::{
    EntityEvent, EventBus, NotificationKind, Position, SimulatorEvent, Subscription,
    TimedPosition, UnitStatus,
};
use tracing::{Span, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::simulator::Simulator;

const FORWARDED: [NotificationKind; 5] = [
    NotificationKind::Position,
    NotificationKind::Status,
    NotificationKind::Route,
    NotificationKind::RouteFinished,
    NotificationKind::Error,
];

struct VehicleState {
    updated_at: DateTime<Utc>,
    position: TimedPosition,
    status: UnitStatus,
    simulator: Option<Simulator>,
    subscriptions: Vec<Subscription>,
}

struct VehicleInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    events: EventBus<EntityEvent>,
    state: Mutex<VehicleState>,
    span: Span,
}

/// A simulated vehicle.
///
/// Owns at most one simulator and re-publishes its notifications as
/// [`EntityEvent`]s under the vehicle id. Cloning yields another handle
/// to the same vehicle.
#[derive(Clone)]
pub struct Vehicle {
    inner: Arc<VehicleInner>,
}

impl std::fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Vehicle")
            .field("id", &self.inner.id)
            .field("position", &state.position)
            .field("status", &state.status)
            .field("simulator", &state.simulator.as_ref().map(Simulator::kind))
            .finish()
    }
}

impl Vehicle {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(VehicleInner {
                id,
                created_at: now,
                events: EventBus::new(),
                state: Mutex::new(VehicleState {
                    updated_at: now,
                    position: Position::default().at(now),
                    status: UnitStatus::default(),
                    simulator: None,
                    subscriptions: Vec::new(),
                }),
                span: tracing::info_span!("vehicle", component = "Vehicle", entity_id = %id),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, VehicleState> {
        self.inner.state()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state().updated_at
    }

    pub fn position(&self) -> TimedPosition {
        self.state().position
    }

    pub fn status(&self) -> UnitStatus {
        self.state().status
    }

    pub fn events(&self) -> &EventBus<EntityEvent> {
        &self.inner.events
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn simulator(&self) -> Option<Simulator> {
        self.state().simulator.clone()
    }

    /// One-line summary for logs.
    pub fn info(&self) -> String {
        let state = self.state();
        format!(
            "Vehicle {} at ({:.6}, {:.6}) status {} {} driven by {}, updated {}",
            self.inner.id,
            state.position.latitude(),
            state.position.longitude(),
            state.status.code(),
            state.status.as_str(),
            state
                .simulator
                .as_ref()
                .map_or("no simulator", Simulator::kind),
            state.updated_at.to_rfc3339(),
        )
    }

    /// Attach `simulator` and prepare it.
    ///
    /// The vehicle subscribes before the simulator's setup runs, so
    /// notifications raised during setup, such as a routing failure,
    /// are re-published too. A previously attached simulator is torn
    /// down first.
    pub async fn setup(&self, simulator: Simulator) -> Result<()> {
        self.teardown();

        let weak = Arc::downgrade(&self.inner);
        let subscriptions = FORWARDED
            .into_iter()
            .map(|kind| {
                let weak: Weak<VehicleInner> = weak.clone();
                simulator.events().subscribe(kind, move |event| {
                    if let Some(vehicle) = weak.upgrade() {
                        vehicle.forward(event);
                    }
                })
            })
            .collect();

        {
            let mut state = self.state();
            state.subscriptions = subscriptions;
            state.simulator = Some(simulator.clone());
        }

        info!(
            parent: &self.inner.span,
            simulator = simulator.kind(),
            simulator_id = %simulator.id(),
            "Setting up simulator"
        );
        if let Err(err) = simulator.setup().await {
            warn!(parent: &self.inner.span, error = %err, "Simulator setup failed");
            return Err(err);
        }
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        match self.simulator() {
            Some(simulator) => {
                info!(parent: &self.inner.span, "Starting vehicle");
                simulator.start()
            }
            None => {
                warn!(parent: &self.inner.span, "Vehicle has no simulator to start");
                Ok(())
            }
        }
    }

    pub fn stop(&self) {
        if let Some(simulator) = self.simulator() {
            simulator.stop();
        }
    }

    /// Stop the simulator and drop every subscription to it.
    pub fn teardown(&self) {
        let (simulator, subscriptions) = {
            let mut state = self.state();
            (
                state.simulator.take(),
                std::mem::take(&mut state.subscriptions),
            )
        };
        if let Some(simulator) = simulator {
            simulator.stop();
        }
        drop(subscriptions);
    }

    pub fn set_position(&self, position: Position) {
        self.inner.apply(SimulatorEvent::Position(position.at(Utc::now())));
    }

    pub fn set_status(&self, status: UnitStatus) {
        self.inner.apply(SimulatorEvent::Status(status));
    }
}

impl VehicleInner {
    fn state(&self) -> MutexGuard<'_, VehicleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, event: &SimulatorEvent) {
        self.apply(event.clone());
    }

    fn apply(&self, event: SimulatorEvent) {
        {
            let mut state = self.state();
            match &event {
                SimulatorEvent::Position(timed) => {
                    state.position = *timed;
                    state.updated_at = Utc::now();
                }
                SimulatorEvent::Status(status) => {
                    state.status = *status;
                    state.updated_at = Utc::now();
                }
                SimulatorEvent::Error(message) => {
                    warn!(parent: &self.span, error = %message, "Simulator reported an error");
                }
                SimulatorEvent::Route(_) | SimulatorEvent::RouteFinished => {}
            }
        }
        self.events.publish(EntityEvent {
            entity_id: self.id,
            event,
        });
    }
}

impl Drop for VehicleInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(simulator) = state.simulator.take() {
            simulator.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RouteOptions, RouteSimulator};
    use crate::test_helpers::StraightLineProvider;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<EntityEvent>>>;

    fn record(vehicle: &Vehicle) -> (Seen, Vec<Subscription>) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let subs = FORWARDED
            .into_iter()
            .map(|kind| {
                let seen = Arc::clone(&seen);
                vehicle.events().subscribe(kind, move |event| {
                    seen.lock().unwrap().push(event.clone());
                })
            })
            .collect();
        (seen, subs)
    }

    #[test]
    fn test_defaults() {
        let vehicle = Vehicle::new(Uuid::new_v4());
        assert_eq!(vehicle.position().position, Position::new(50.7373889, 7.0981944));
        assert_eq!(vehicle.status(), UnitStatus::OutOfService);
        assert!(vehicle.simulator().is_none());
        assert!(vehicle.info().contains("status 6 OUT_OF_SERVICE"));
    }

    #[test]
    fn test_manual_updates_are_republished() {
        let vehicle = Vehicle::new(Uuid::new_v4());
        let (seen, _subs) = record(&vehicle);
        let before = vehicle.updated_at();

        vehicle.set_status(UnitStatus::AtStation);
        vehicle.set_position(Position::new(1.0, 2.0));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.entity_id == vehicle.id()));
        assert_eq!(vehicle.status(), UnitStatus::AtStation);
        assert_eq!(vehicle.position().position, Position::new(1.0, 2.0));
        assert!(vehicle.updated_at() >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_events_carry_vehicle_identity() {
        let vehicle = Vehicle::new(Uuid::new_v4());
        let (seen, _subs) = record(&vehicle);
        let simulator = RouteSimulator::new(
            Position::new(0.0, 0.0),
            Position::new(0.0, 0.0005),
            RouteOptions::default(),
            Arc::new(StraightLineProvider),
        );

        vehicle.setup(simulator.into()).await.unwrap();
        vehicle.start().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let seen = seen.lock().unwrap();
        let kinds: Vec<_> = seen.iter().map(|e| e.event.clone()).collect();
        assert!(matches!(kinds.first(), Some(SimulatorEvent::Route(_))));
        assert!(kinds.contains(&SimulatorEvent::RouteFinished));
        assert!(seen.iter().all(|e| e.entity_id == vehicle.id()));
        assert_eq!(vehicle.position().position, Position::new(0.0, 0.0005));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_simulator_subscriptions() {
        let vehicle = Vehicle::new(Uuid::new_v4());
        let simulator = RouteSimulator::new(
            Position::new(0.0, 0.0),
            Position::new(0.0, 0.0),
            RouteOptions::default(),
            Arc::new(StraightLineProvider),
        );
        let bus = simulator.events().clone();

        vehicle.setup(simulator.into()).await.unwrap();
        assert_eq!(bus.listener_count(NotificationKind::Position), 1);

        vehicle.teardown();
        assert_eq!(bus.listener_count(NotificationKind::Position), 0);
        assert!(vehicle.simulator().is_none());
    }
}
