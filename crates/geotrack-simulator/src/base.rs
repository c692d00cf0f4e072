//! State shared by every simulator variant.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use geotrack_domain::{
    EventBus, Position, Route, SimulatorEvent, TimedPosition, UnitStatus,
};
use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Default)]
struct CoreState {
    position: Option<TimedPosition>,
    status: UnitStatus,
    history: Vec<TimedPosition>,
}

struct CoreInner {
    id: Uuid,
    events: EventBus<SimulatorEvent>,
    state: Mutex<CoreState>,
    span: Span,
}

/// Identity, position log and notification bus of one simulator.
///
/// Every position change is appended to the history with a timestamp
/// that never goes backwards, then announced exactly once. Cloning
/// shares the same state.
#[derive(Clone)]
pub struct SimulatorCore {
    inner: Arc<CoreInner>,
}

impl std::fmt::Debug for SimulatorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorCore")
            .field("id", &self.inner.id)
            .field("position", &self.position())
            .field("status", &self.status())
            .finish()
    }
}

impl SimulatorCore {
    /// Create a core for a simulator variant named `component`.
    pub fn new(component: &'static str) -> Self {
        Self::with_id(Uuid::new_v4(), component)
    }

    pub fn with_id(id: Uuid, component: &'static str) -> Self {
        let span = tracing::info_span!("simulator", component, entity_id = %id);
        Self {
            inner: Arc::new(CoreInner {
                id,
                events: EventBus::new(),
                state: Mutex::new(CoreState::default()),
                span,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn events(&self) -> &EventBus<SimulatorEvent> {
        &self.inner.events
    }

    /// Logging handle carrying the component name and simulator id.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn position(&self) -> Option<TimedPosition> {
        self.state().position
    }

    pub fn status(&self) -> UnitStatus {
        self.state().status
    }

    /// Snapshot of every recorded position, oldest first.
    pub fn history(&self) -> Vec<TimedPosition> {
        self.state().history.clone()
    }

    /// Move to `position` now.
    pub fn set_position(&self, position: Position) -> TimedPosition {
        self.record(position.at(Utc::now()))
    }

    /// Move to an already timestamped position, e.g. one forwarded from
    /// a nested simulator. The timestamp is raised to the last recorded
    /// one if it would otherwise go backwards.
    pub fn record(&self, mut timed: TimedPosition) -> TimedPosition {
        {
            let mut state = self.state();
            if let Some(last) = state.history.last() {
                if timed.timestamp < last.timestamp {
                    timed.timestamp = last.timestamp;
                }
            }
            state.position = Some(timed);
            state.history.push(timed);
        }
        self.inner.events.publish(SimulatorEvent::Position(timed));
        timed
    }

    pub fn set_status(&self, status: UnitStatus) {
        self.state().status = status;
        tracing::debug!(parent: &self.inner.span, status = status.code(), "Status changed");
        self.inner.events.publish(SimulatorEvent::Status(status));
    }

    pub fn publish_route(&self, route: Route) {
        self.inner.events.publish(SimulatorEvent::Route(route));
    }

    pub fn publish_finished(&self) {
        self.inner.events.publish(SimulatorEvent::RouteFinished);
    }

    pub fn publish_error(&self, message: impl Into<String>) {
        self.inner.events.publish(SimulatorEvent::Error(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use geotrack_domain::NotificationKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_position_change_is_recorded_and_published_once() {
        let core = SimulatorCore::new("Test");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = core.events().subscribe(NotificationKind::Position, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        core.set_position(Position::new(1.0, 1.0));
        core.set_position(Position::new(2.0, 2.0));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(core.history().len(), 2);
        assert_eq!(
            core.position().map(|p| p.position),
            Some(Position::new(2.0, 2.0))
        );
    }

    #[test]
    fn test_history_timestamps_never_decrease() {
        let core = SimulatorCore::new("Test");
        let now = Utc::now();

        core.record(Position::new(1.0, 1.0).at(now));
        let stale = core.record(Position::new(2.0, 2.0).at(now - Duration::seconds(5)));

        assert_eq!(stale.timestamp, now);
        let history = core.history();
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_status_defaults_to_out_of_service() {
        let core = SimulatorCore::new("Test");
        assert_eq!(core.status(), UnitStatus::OutOfService);

        core.set_status(UnitStatus::Responding);
        assert_eq!(core.status(), UnitStatus::Responding);
    }
}
