//! In-memory routing providers and event capture for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geotrack_domain::{
    EventBus, NotificationKind, Position, Route, SimulatorEvent, Subscription, UnitStatus,
};

use crate::error::RoutingError;
use crate::routing::{RoutePlan, RouteProvider, RouteRequest};

/// Answers every request with the two-point route `start -> end`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineProvider;

#[async_trait]
impl RouteProvider for StraightLineProvider {
    async fn fetch(&self, request: &RouteRequest) -> Result<RoutePlan, RoutingError> {
        Ok(RoutePlan::from_route(Route::new(vec![
            request.start,
            request.end,
        ])))
    }
}

/// Replays a fixed list of responses, one per call. Once the script is
/// used up every call fails with [`RoutingError::EmptyRoute`].
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<RoutePlan, RoutingError>>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<RoutePlan, RoutingError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for ScriptedProvider {
    async fn fetch(&self, _request: &RouteRequest) -> Result<RoutePlan, RoutingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(RoutingError::EmptyRoute))
    }
}

/// Records every notification published on a bus.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SimulatorEvent>>>,
    _subscriptions: Vec<Subscription>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus<SimulatorEvent>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let kinds = [
            NotificationKind::Position,
            NotificationKind::Status,
            NotificationKind::Route,
            NotificationKind::RouteFinished,
            NotificationKind::Error,
        ];
        let subscriptions = kinds
            .into_iter()
            .map(|kind| {
                let events = Arc::clone(&events);
                bus.subscribe(kind, move |event: &SimulatorEvent| {
                    events.lock().unwrap().push(event.clone());
                })
            })
            .collect();

        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> Vec<SimulatorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SimulatorEvent::Position(p) => Some(p.position),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<UnitStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SimulatorEvent::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        use geotrack_domain::Notification;
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}
