//! Latest-value-wins buffer for updates that could not be sent.

use std::collections::HashMap;

use uuid::Uuid;

use super::message::OutboundMessage;

/// Which slot of an entity an update occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Position,
    Status,
}

#[derive(Debug, Default)]
struct Slots {
    position: Option<OutboundMessage>,
    status: Option<OutboundMessage>,
}

impl Slots {
    fn slot(&mut self, kind: SlotKind) -> &mut Option<OutboundMessage> {
        match kind {
            SlotKind::Position => &mut self.position,
            SlotKind::Status => &mut self.status,
        }
    }

    fn is_empty(&self) -> bool {
        self.position.is_none() && self.status.is_none()
    }
}

/// One pending position and one pending status per entity.
///
/// Entities drain in registration order, so a flush replays them in the
/// order they were attached.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    order: Vec<Uuid>,
    slots: HashMap<Uuid, Slots>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a place in the drain order for `entity_id`.
    pub fn register(&mut self, entity_id: Uuid) {
        if !self.slots.contains_key(&entity_id) {
            self.order.push(entity_id);
            self.slots.insert(entity_id, Slots::default());
        }
    }

    /// Forget `entity_id` and anything pending for it.
    pub fn remove(&mut self, entity_id: Uuid) {
        self.order.retain(|id| *id != entity_id);
        self.slots.remove(&entity_id);
    }

    /// Store `message`, replacing an older one in the same slot.
    /// Returns `true` if an older value was superseded.
    pub fn put(&mut self, entity_id: Uuid, kind: SlotKind, message: OutboundMessage) -> bool {
        self.register(entity_id);
        self.slots
            .get_mut(&entity_id)
            .is_some_and(|slots| slots.slot(kind).replace(message).is_some())
    }

    /// Store `message` only if its slot is empty and the entity is still
    /// registered. Used to put back updates a dropped connection never
    /// transmitted, which are older than anything buffered since. Callers
    /// restore newest first so the latest leftover claims the slot.
    pub fn restore(&mut self, entity_id: Uuid, kind: SlotKind, message: OutboundMessage) {
        if let Some(slot) = self.slots.get_mut(&entity_id).map(|s| s.slot(kind)) {
            if slot.is_none() {
                *slot = Some(message);
            }
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .map(|s| usize::from(s.position.is_some()) + usize::from(s.status.is_some()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.values().all(Slots::is_empty)
    }

    /// Take every pending update, leaving the registrations in place.
    pub fn drain(&mut self) -> Vec<(Uuid, SlotKind, OutboundMessage)> {
        let mut out = Vec::with_capacity(self.len());
        for id in &self.order {
            if let Some(slots) = self.slots.get_mut(id) {
                if let Some(message) = slots.position.take() {
                    out.push((*id, SlotKind::Position, message));
                }
                if let Some(message) = slots.status.take() {
                    out.push((*id, SlotKind::Status, message));
                }
            }
        }
        out
    }
}
