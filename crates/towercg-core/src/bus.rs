//! Event Bus
//!
//! In-process publish/subscribe channel keyed by namespaced event names.
//! Delivery is synchronous and follows subscription order. A listener that
//! fails or panics is logged and skipped; the remaining listeners still run.
//! Nothing is buffered for late subscribers.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

use crate::names::EventName;
use crate::panic::call_guarded;

/// An ephemeral, named notification.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: EventName,
    pub payload: Value,
}

/// Callback invoked for every matching event.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Which event names a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    /// Exactly one name
    Exact(EventName),
    /// Every name in a namespace (`<namespace>.*`)
    Namespace(String),
    /// Every name
    All,
}

impl EventPattern {
    /// Parse `*`, `<namespace>.*` or a fully qualified name.
    pub fn parse(pattern: &str) -> crate::Result<Self> {
        if pattern == "*" {
            return Ok(EventPattern::All);
        }
        if let Some(namespace) = pattern.strip_suffix(".*") {
            if !namespace.is_empty() && !namespace.contains('.') {
                return Ok(EventPattern::Namespace(namespace.to_string()));
            }
        }
        EventName::new(pattern).map(EventPattern::Exact)
    }

    pub fn matches(&self, name: &EventName) -> bool {
        match self {
            EventPattern::Exact(exact) => exact == name,
            EventPattern::Namespace(namespace) => name.namespace() == namespace,
            EventPattern::All => true,
        }
    }
}

impl From<EventName> for EventPattern {
    fn from(name: EventName) -> Self {
        EventPattern::Exact(name)
    }
}

struct Entry {
    id: u64,
    pattern: EventPattern,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry>>,
    tracers: RwLock<Vec<Entry>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        for list in [&self.listeners, &self.tracers] {
            let mut entries = list.write().unwrap_or_else(|e| e.into_inner());
            entries.retain(|entry| entry.id != id);
        }
    }
}

/// Shared handle to the bus. Cloning is cheap.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bus that logs every event at debug level.
    pub fn with_event_logging() -> Self {
        let bus = Self::new();
        bus.trace(|event| {
            debug!(event = %event.name, payload = %event.payload, ">> EVENT");
            Ok(())
        })
        .detach();
        bus
    }

    /// Deliver an event to every tracer, then to every matching subscriber
    /// in subscription order. Returns the number of subscribers (tracers
    /// excluded) that were invoked.
    pub fn publish(&self, name: EventName, payload: Value) -> usize {
        let event = Event { name, payload };

        for listener in self.snapshot(&self.inner.tracers, &event) {
            if let Err(e) = call_guarded(|| listener(&event)) {
                warn!(event = %event.name, "Event tracer failed: {:#}", e);
            }
        }

        let listeners = self.snapshot(&self.inner.listeners, &event);
        let delivered = listeners.len();
        for listener in listeners {
            if let Err(e) = call_guarded(|| listener(&event)) {
                warn!(event = %event.name, "Event listener failed: {:#}", e);
            }
        }
        delivered
    }

    /// Register a listener for every event matching `pattern`.
    pub fn subscribe<F>(&self, pattern: impl Into<EventPattern>, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(&self.inner.listeners, pattern.into(), Arc::new(listener))
    }

    /// Register a listener that sees every event before ordinary
    /// subscribers do. Tracers never change ordinary delivery order.
    pub fn trace<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(&self.inner.tracers, EventPattern::All, Arc::new(listener))
    }

    /// Number of ordinary subscriptions currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn insert(&self, list: &RwLock<Vec<Entry>>, pattern: EventPattern, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        list.write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Entry { id, pattern, listener });
        Subscription {
            id,
            bus: Some(Arc::downgrade(&self.inner)),
        }
    }

    // Listeners are copied out so they can subscribe or publish themselves.
    fn snapshot(&self, list: &RwLock<Vec<Entry>>, event: &Event) -> Vec<Listener> {
        list.read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.pattern.matches(&event.name))
            .map(|entry| Arc::clone(&entry.listener))
            .collect()
    }
}

/// Handle to a registered listener. Dropping it (or calling `cancel`)
/// removes the listener; `detach` keeps it for the life of the bus.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    id: u64,
    bus: Option<Weak<BusInner>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(mut self) {
        self.release();
    }

    pub fn detach(mut self) {
        self.bus = None;
    }

    fn release(&mut self) {
        if let Some(inner) = self.bus.take().and_then(|weak| weak.upgrade()) {
            inner.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.bus.is_some())
            .finish()
    }
}
