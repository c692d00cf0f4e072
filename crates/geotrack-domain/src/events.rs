//! Synchronous publish/subscribe primitive.
//!
//! Every stateful component owns an [`EventBus`] and announces its
//! position, status and route changes through it. Listeners run on the
//! publisher's task, in registration order. A publish issued while the
//! bus is already dispatching is queued and delivered once the current
//! listener list has been walked, so deliveries never interleave.
//! This holds across threads too: a publish from another thread during a
//! dispatch returns at once and its event is delivered by the thread that
//! is already dispatching.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Tag that routes a notification to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Position,
    Status,
    Route,
    RouteFinished,
    Error,
}

impl NotificationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Position => "positionUpdate",
            Self::Status => "statusUpdate",
            Self::Route => "routeUpdate",
            Self::RouteFinished => "routeFinished",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can travel over an [`EventBus`].
pub trait Notification: Send + 'static {
    fn kind(&self) -> NotificationKind;
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: HashMap<NotificationKind, Vec<(u64, Listener<E>)>>,
}

struct Dispatch<E> {
    active: bool,
    queue: VecDeque<E>,
}

struct Inner<E> {
    registry: Mutex<Registry<E>>,
    dispatch: Mutex<Dispatch<E>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Listener registry keyed by [`NotificationKind`]. Cloning shares the
/// same registry.
pub struct EventBus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Notification> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.inner.registry);
        let total: usize = registry.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("listeners", &total).finish()
    }
}

impl<E: Notification> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    next_id: 0,
                    listeners: HashMap::new(),
                }),
                dispatch: Mutex::new(Dispatch {
                    active: false,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Register `listener` for notifications of `kind`.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is dropped or cancelled.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe<F>(&self, kind: NotificationKind, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.inner.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .listeners
                .entry(kind)
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(kind, move || {
            if let Some(inner) = weak.upgrade() {
                let mut registry = lock(&inner.registry);
                if let Some(list) = registry.listeners.get_mut(&kind) {
                    list.retain(|(lid, _)| *lid != id);
                }
            }
        })
    }

    /// Deliver `event` to every listener registered for its kind.
    pub fn publish(&self, event: E) {
        {
            let mut dispatch = lock(&self.inner.dispatch);
            if dispatch.active {
                dispatch.queue.push_back(event);
                return;
            }
            dispatch.active = true;
        }

        let _reset = ResetOnDrop(&self.inner.dispatch);
        let mut next = Some(event);
        while let Some(event) = next {
            let listeners: Vec<Listener<E>> = lock(&self.inner.registry)
                .listeners
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default();

            for listener in listeners {
                listener(&event);
            }

            let mut dispatch = lock(&self.inner.dispatch);
            next = dispatch.queue.pop_front();
            if next.is_none() {
                dispatch.active = false;
            }
        }
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: NotificationKind) -> usize {
        lock(&self.inner.registry)
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Clears the dispatching flag when a listener panics mid-dispatch.
struct ResetOnDrop<'a, E>(&'a Mutex<Dispatch<E>>);

impl<E> Drop for ResetOnDrop<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut dispatch = lock(self.0);
            dispatch.active = false;
            dispatch.queue.clear();
        }
    }
}

/// Handle to a registered listener. Dropping it unregisters the listener.
pub struct Subscription {
    kind: NotificationKind,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(kind: NotificationKind, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            kind,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub const fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Unregister the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Position, SimulatorEvent, UnitStatus};
    use chrono::Utc;

    fn position_event(lat: f64) -> SimulatorEvent {
        SimulatorEvent::Position(Position::new(lat, 0.0).at(Utc::now()))
    }

    #[test]
    fn test_publish_in_registration_order() {
        let bus = EventBus::<SimulatorEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for n in 0..3 {
            let log = Arc::clone(&log);
            subs.push(bus.subscribe(NotificationKind::Position, move |_| {
                log.lock().unwrap().push(n);
            }));
        }

        bus.publish(position_event(1.0));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_kind_is_delivered() {
        let bus = EventBus::<SimulatorEvent>::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&hits);
        let _sub = bus.subscribe(NotificationKind::Status, move |_| {
            *counter.lock().unwrap() += 1;
        });

        bus.publish(position_event(1.0));
        bus.publish(SimulatorEvent::Status(UnitStatus::OnScene));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let bus = EventBus::<SimulatorEvent>::new();
        let sub = bus.subscribe(NotificationKind::Position, |_| {});
        let other = bus.subscribe(NotificationKind::Position, |_| {});
        assert_eq!(bus.listener_count(NotificationKind::Position), 2);

        drop(sub);
        assert_eq!(bus.listener_count(NotificationKind::Position), 1);

        other.unsubscribe();
        assert_eq!(bus.listener_count(NotificationKind::Position), 0);
    }

    #[test]
    fn test_reentrant_publish_is_queued_after_current_dispatch() {
        let bus = EventBus::<SimulatorEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let republisher = bus.clone();
        let _a = bus.subscribe(NotificationKind::Position, move |event| {
            if let SimulatorEvent::Position(p) = event {
                first_log.lock().unwrap().push(format!("a:{}", p.latitude()));
                if p.latitude() < 2.0 {
                    republisher.publish(position_event(2.0));
                }
            }
        });

        let second_log = Arc::clone(&log);
        let _b = bus.subscribe(NotificationKind::Position, move |event| {
            if let SimulatorEvent::Position(p) = event {
                second_log.lock().unwrap().push(format!("b:{}", p.latitude()));
            }
        });

        bus.publish(position_event(1.0));
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "a:2", "b:2"]);
    }

    #[test]
    fn test_publish_from_other_thread_is_delivered_by_dispatcher() {
        use std::sync::Barrier;
        use std::thread;

        let bus = EventBus::<SimulatorEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let entered = Arc::new(Barrier::new(2));
        let published = Arc::new(Barrier::new(2));

        let listener_log = Arc::clone(&log);
        let listener_entered = Arc::clone(&entered);
        let listener_published = Arc::clone(&published);
        let _sub = bus.subscribe(NotificationKind::Position, move |event| {
            if let SimulatorEvent::Position(p) = event {
                listener_log
                    .lock()
                    .unwrap()
                    .push((p.latitude(), thread::current().id()));
                if p.latitude() < 2.0 {
                    listener_entered.wait();
                    listener_published.wait();
                }
            }
        });

        let other_bus = bus.clone();
        let other_log = Arc::clone(&log);
        let other = thread::spawn(move || {
            entered.wait();
            other_bus.publish(position_event(2.0));
            let seen = other_log.lock().unwrap().len();
            published.wait();
            seen
        });

        bus.publish(position_event(1.0));
        assert_eq!(other.join().unwrap(), 1);

        let main = thread::current().id();
        assert_eq!(*log.lock().unwrap(), vec![(1.0, main), (2.0, main)]);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus = EventBus::<SimulatorEvent>::new();
        let sub = bus.subscribe(NotificationKind::Error, |_| {});
        drop(bus);
        drop(sub);
    }
}
