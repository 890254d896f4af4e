//! In-process event bus with scoped subscriptions.
//!
//! Listeners are invoked synchronously in registration order. The listener
//! table is never locked while a listener runs, so listeners may fire
//! further events or drop their own subscription.

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Host event: a watched source changed state.
pub const EVENT_STATE_CHANGED: &str = "state_changed";

/// Host event: a registry entry was created, updated or removed.
pub const EVENT_ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

/// A timestamped message delivered on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub event_type: String,
    pub data: serde_json::Value,
    pub time_fired: DateTime<Utc>,
    pub context_id: Uuid,
}

impl BusMessage {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context_id: Uuid::new_v4(),
        }
    }

    /// String field of the payload, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Callback type for bus listeners
pub type Listener = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct Registration {
    id: u64,
    event_type: String,
    listener: Listener,
}

/// Event bus shared between the host and its monitored units.
pub struct EventBus {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `listener` for `event_type`.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// released or dropped.
    pub fn listen<F>(self: &Arc<Self>, event_type: &str, listener: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push(Registration {
            id,
            event_type: event_type.to_string(),
            listener: Arc::new(listener),
        });
        debug!("[Bus] Listener {} registered for {}", id, event_type);
        Subscription {
            bus: Arc::downgrade(self),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Build a message and deliver it.
    pub fn fire(&self, event_type: &str, data: serde_json::Value) -> BusMessage {
        let message = BusMessage::new(event_type, data);
        self.fire_message(&message);
        message
    }

    /// Deliver an already built message to its listeners.
    pub fn fire_message(&self, message: &BusMessage) {
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.event_type == message.event_type)
            .map(|r| r.listener.clone())
            .collect();

        for listener in targets {
            listener(message);
        }
    }

    /// Number of listeners currently registered for `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|r| r.event_type == event_type)
            .count()
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }
}

/// Handle for one bus registration.
///
/// Released at most once: [`unsubscribe`](Self::unsubscribe) is idempotent
/// and dropping the handle releases it too.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener. Returns `true` only on the call that released it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.bus.upgrade() {
            Some(bus) => {
                debug!("[Bus] Listener {} released", self.id);
                bus.remove(self.id)
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listener_receives_matching_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let _sub = bus.listen("ping", move |msg| {
            assert_eq!(msg.str_field("from"), Some("test"));
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.fire("ping", json!({"from": "test"}));
        bus.fire("pong", json!({"from": "test"}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.listen("ping", |_| {});
        assert_eq!(bus.listener_count("ping"), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert_eq!(bus.listener_count("ping"), 0);
    }

    #[test]
    fn test_drop_releases_listener() {
        let bus = EventBus::new();
        {
            let _sub = bus.listen("ping", |_| {});
            assert_eq!(bus.listener_count("ping"), 1);
        }
        assert_eq!(bus.listener_count("ping"), 0);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.listen("ping", |_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_listener_can_fire_nested_event() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let inner_bus = Arc::downgrade(&bus);
        let _relay = bus.listen("outer", move |_| {
            if let Some(bus) = inner_bus.upgrade() {
                bus.fire("inner", json!({}));
            }
        });
        let seen_clone = seen.clone();
        let _sink = bus.listen("inner", move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.fire("outer", json!({}));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
