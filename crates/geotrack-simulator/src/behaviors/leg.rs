//! One point-to-point traversal driven inside a composite behavior.

use std::sync::{Mutex, PoisonError};

use geotrack_domain::{NotificationKind, Position, SimulatorEvent};
use tokio::sync::mpsc;

use crate::base::SimulatorCore;
use crate::error::{Result, SimulatorError};
use crate::route::{RouteOptions, RouteSimulator};
use crate::routing::SharedRouteProvider;

enum LegOutcome {
    Finished,
    Failed(String),
}

/// Slot holding the leg currently in progress so `stop()` can reach it.
pub(crate) type LegSlot = Mutex<Option<RouteSimulator>>;

pub(crate) fn stop_current(slot: &LegSlot) {
    let leg = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(leg) = leg {
        leg.stop();
    }
}

/// Drive a route leg from `start` to `end` to completion.
///
/// Positions and the route of the leg are re-published on `owner`.
/// Resolves once the leg reports arrival; a leg that cannot obtain a
/// route, or that reports an error, is a failure.
pub(crate) async fn run_leg(
    owner: &SimulatorCore,
    slot: &LegSlot,
    start: Position,
    end: Position,
    options: &RouteOptions,
    provider: &SharedRouteProvider,
) -> Result<()> {
    let leg = RouteSimulator::new(start, end, options.clone(), provider.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let forward_position = {
        let owner = owner.clone();
        leg.events().subscribe(NotificationKind::Position, move |event| {
            if let SimulatorEvent::Position(timed) = event {
                owner.record(*timed);
            }
        })
    };
    let forward_route = {
        let owner = owner.clone();
        leg.events().subscribe(NotificationKind::Route, move |event| {
            if let SimulatorEvent::Route(route) = event {
                owner.publish_route(route.clone());
            }
        })
    };
    let on_finished = {
        let tx = tx.clone();
        leg.events().subscribe(NotificationKind::RouteFinished, move |_| {
            let _ = tx.send(LegOutcome::Finished);
        })
    };
    let on_error = leg.events().subscribe(NotificationKind::Error, move |event| {
        if let SimulatorEvent::Error(message) = event {
            let _ = tx.send(LegOutcome::Failed(message.clone()));
        }
    });

    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(leg.clone());

    let outcome = drive(&leg, &mut rx).await;

    drop((forward_position, forward_route, on_finished, on_error));
    let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if current.as_ref().is_some_and(|l| l.id() == leg.id()) {
        *current = None;
    }
    outcome
}

async fn drive(leg: &RouteSimulator, outcomes: &mut mpsc::UnboundedReceiver<LegOutcome>) -> Result<()> {
    leg.setup().await?;
    leg.start()?;
    if leg.route().is_empty() {
        return Ok(());
    }
    match outcomes.recv().await {
        Some(LegOutcome::Finished) => Ok(()),
        Some(LegOutcome::Failed(message)) => Err(SimulatorError::LegFailed(message)),
        None => Err(SimulatorError::LegFailed("leg ended without arriving".into())),
    }
}
