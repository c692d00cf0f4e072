//! Connector abstraction and entity attachment bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use geotrack_domain::Subscription;
use geotrack_simulator::Vehicle;
use uuid::Uuid;

use crate::error::Result;

/// A sink that vehicle notifications are forwarded to.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Identifier from the scenario configuration.
    fn id(&self) -> &str;

    /// Open the connection to the sink.
    async fn connect(&self) -> Result<()>;

    /// Close the connection and stop any reconnect attempts.
    async fn disconnect(&self) -> Result<()>;

    /// Start forwarding `vehicle`'s notifications. Returns `false` if the
    /// vehicle was already attached, in which case nothing changes.
    fn attach(&self, vehicle: &Vehicle) -> bool;

    /// Stop forwarding for `entity_id`. Returns `false` if it was unknown.
    fn detach(&self, entity_id: Uuid) -> bool;

    /// Ids of the attached vehicles in attach order.
    fn attached(&self) -> Vec<Uuid>;
}

/// Shared handle to a connector.
pub type SharedConnector = Arc<dyn Connector>;

/// Attached entities and their subscriptions, kept in attach order.
#[derive(Default)]
pub struct Attachments {
    inner: Mutex<AttachmentsInner>,
}

#[derive(Default)]
struct AttachmentsInner {
    order: Vec<Uuid>,
    subscriptions: HashMap<Uuid, Vec<Subscription>>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, entity_id: Uuid) -> bool {
        self.lock().subscriptions.contains_key(&entity_id)
    }

    /// Register `entity_id` with the subscriptions produced by `subscribe`.
    /// `subscribe` is not called if the entity is already known.
    pub fn insert_with<F>(&self, entity_id: Uuid, subscribe: F) -> bool
    where
        F: FnOnce() -> Vec<Subscription>,
    {
        let mut inner = self.lock();
        if inner.subscriptions.contains_key(&entity_id) {
            return false;
        }
        inner.order.push(entity_id);
        inner.subscriptions.insert(entity_id, subscribe());
        true
    }

    pub fn remove(&self, entity_id: Uuid) -> bool {
        let removed = {
            let mut inner = self.lock();
            inner.order.retain(|id| *id != entity_id);
            inner.subscriptions.remove(&entity_id)
        };
        removed.is_some()
    }

    /// Drop every subscription.
    pub fn clear(&self) -> Vec<Uuid> {
        let (order, subscriptions) = {
            let mut inner = self.lock();
            (
                std::mem::take(&mut inner.order),
                std::mem::take(&mut inner.subscriptions),
            )
        };
        drop(subscriptions);
        order
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.lock().order.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AttachmentsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
