use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use courier_core::errors::HandlerError;
use courier_core::events::{Event, EventName};
use parking_lot::RwLock;

/// A subscriber callback. Handlers run synchronously on the dispatch path.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct Slots {
    next_id: u64,
    by_name: HashMap<EventName, Vec<(u64, Handler)>>,
}

/// Event name → ordered handler list.
///
/// The registry outlives any single connection: disconnects, reconnects and
/// role switches never touch it. Only disposing a [`Subscription`] removes a handler.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    slots: Arc<RwLock<Slots>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`. Registering the same closure twice yields two entries.
    pub fn on<F>(&self, name: EventName, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut slots = self.slots.write();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.by_name.entry(name).or_default().push((id, handler));
        tracing::debug!(event = %name, subscription = id, "handler registered");
        Subscription {
            slots: Arc::downgrade(&self.slots),
            name,
            id,
            disposed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the handlers for `name`, in registration order.
    ///
    /// Dispatch iterates the snapshot, so handlers may subscribe or dispose
    /// during delivery without affecting the event in flight.
    pub fn handlers_for(&self, name: EventName) -> Vec<Handler> {
        self.slots
            .read()
            .by_name
            .get(&name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, name: EventName) -> usize {
        self.slots.read().by_name.get(&name).map_or(0, Vec::len)
    }

    pub fn has_subscribers(&self, name: EventName) -> bool {
        self.subscriber_count(name) > 0
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        let counts: HashMap<&str, usize> = slots
            .by_name
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

/// Disposal handle for one registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    slots: Weak<RwLock<Slots>>,
    name: EventName,
    id: u64,
    disposed: AtomicBool,
}

impl Subscription {
    /// Remove exactly this registration. Returns `false` if it was already gone.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(slots) = self.slots.upgrade() else {
            return false;
        };
        let mut slots = slots.write();
        let Some(list) = slots.by_name.get_mut(&self.name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() < before;
        if list.is_empty() {
            let _ = slots.by_name.remove(&self.name);
        }
        tracing::debug!(event = %self.name, subscription = self.id, "handler disposed");
        removed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn event_name(&self) -> EventName {
        self.name
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.name)
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
