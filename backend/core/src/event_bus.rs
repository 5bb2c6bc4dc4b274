//! In-process publish/subscribe bus shared by every component of the host.
//!
//! Delivery within one `emit` call: regular subscribers in registration order,
//! then one-shot subscribers in registration order. One-shot subscribers are
//! detached before they run, so they fire at most once even when they fail or
//! re-enter the bus. A failing or panicking subscriber is logged and never
//! affects the others or the emitter.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::error::HostError;
use crate::event::HostEvent;
use crate::sync::{lock, panic_message};

/// Callback invoked with the emitted payload.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Identifier of a single subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listener {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Listeners {
    regular: Vec<Listener>,
    once: Vec<Listener>,
}

impl Listeners {
    fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.once.is_empty()
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.regular.len() + self.once.len();
        self.regular.retain(|l| l.id != id);
        self.once.retain(|l| l.id != id);
        before != self.regular.len() + self.once.len()
    }
}

#[derive(Default)]
struct BusInner {
    listeners: Mutex<HashMap<String, Listeners>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let mut map = lock(&self.listeners);
        let Some(entry) = map.get_mut(event) else {
            return false;
        };
        let removed = entry.remove(id);
        if entry.is_empty() {
            map.remove(event);
        }
        removed
    }
}

/// Thread-safe event bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by `on`/`once`.
///
/// Dropping the handle keeps the subscription alive; call `unsubscribe` to
/// detach it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Detach the subscriber. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.off(&self.event, self.id),
            None => false,
        }
    }
}

/// Non-owning handle to an `EventBus`, for subscribers that need to emit
/// without keeping the bus alive.
#[derive(Clone)]
pub struct WeakEventBus {
    inner: Weak<BusInner>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to every emission of `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event.into(), Arc::new(handler), false)
    }

    /// Subscribe to the next emission of `event` only.
    pub fn once<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event.into(), Arc::new(handler), true)
    }

    fn subscribe(&self, event: String, handler: Handler, once: bool) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut map = lock(&self.inner.listeners);
            let entry = map.entry(event.clone()).or_default();
            let listener = Listener { id, handler };
            if once {
                entry.once.push(listener);
            } else {
                entry.regular.push(listener);
            }
        }
        trace!(event = %event, once, "Subscriber added");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Remove a subscriber by id. Returns false if it was not subscribed.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.inner.off(event, id)
    }

    /// Deliver `data` to every subscriber of `event`.
    ///
    /// Returns the number of subscribers invoked.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        let (regular, once) = {
            let mut map = lock(&self.inner.listeners);
            let Some(entry) = map.get_mut(event) else {
                trace!(event = %event, "Emit with no subscribers");
                return 0;
            };
            let regular: Vec<Handler> =
                entry.regular.iter().map(|l| l.handler.clone()).collect();
            let once = std::mem::take(&mut entry.once);
            if entry.is_empty() {
                map.remove(event);
            }
            (regular, once)
        };

        let delivered = regular.len() + once.len();
        for handler in &regular {
            invoke(event, handler, data);
        }
        for listener in &once {
            invoke(event, &listener.handler, data);
        }
        delivered
    }

    /// Emit one of the runtime's well-known events.
    pub fn emit_host(&self, event: HostEvent, data: &Value) -> usize {
        self.emit(event.as_str(), data)
    }

    /// Remove every subscriber of every event.
    pub fn clear(&self) {
        let mut map = lock(&self.inner.listeners);
        let events = map.len();
        map.clear();
        debug!(events, "Event bus cleared");
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.inner.listeners)
            .get(event)
            .map(|l| l.regular.len() + l.once.len())
            .unwrap_or(0)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }
}

fn invoke(event: &str, handler: &Handler, data: &Value) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(data))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let err = HostError::Handler(e.to_string());
            warn!(event = %event, error = %err, "Event subscriber failed");
        }
        Err(payload) => {
            let err = HostError::Handler(panic_message(payload.as_ref()));
            error!(event = %event, error = %err, "Event subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &str| -> Handler {
            let log = log_clone.clone();
            let tag = tag.to_string();
            Arc::new(move |_: &Value| {
                log.lock().unwrap().push(tag.clone());
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_regular_then_once_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let h1 = make("once-1");
        bus.once("evt", move |v| h1(v));
        let h2 = make("on-1");
        bus.on("evt", move |v| h2(v));
        let h3 = make("on-2");
        bus.on("evt", move |v| h3(v));
        let h4 = make("once-2");
        bus.once("evt", move |v| h4(v));

        assert_eq!(bus.emit("evt", &json!({})), 4);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["on-1", "on-2", "once-1", "once-2"]
        );
    }

    #[test]
    fn test_once_fires_at_most_once_even_if_it_fails() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.once("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("subscriber exploded")
        });

        bus.emit("evt", &Value::Null);
        bus.emit("evt", &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("evt"), 0);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.on("evt", |_| anyhow::bail!("first fails"));
        bus.on("evt", |_| panic!("second panics"));
        let c = calls.clone();
        bus.on("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.emit("evt", &json!(1)), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_off() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = bus.on("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let other = bus.on("evt", |_| Ok(()));

        assert!(sub.unsubscribe());
        assert!(bus.off("evt", other.id()));
        assert!(!bus.off("evt", other.id()));
        assert_eq!(bus.emit("evt", &Value::Null), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_payload_is_delivered() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Value::Null));
        let s = seen.clone();
        bus.on("user:login", move |v| {
            *s.lock().unwrap() = v.clone();
            Ok(())
        });
        bus.emit("user:login", &json!({"id": 7}));
        assert_eq!(seen.lock().unwrap()["id"], 7);
    }

    #[test]
    fn test_subscriber_may_reenter_bus() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.on("second", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let inner = bus.clone();
        bus.on("first", move |v| {
            inner.emit("second", v);
            inner.once("third", |_| Ok(()));
            Ok(())
        });

        bus.emit("first", &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("third"), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let bus = EventBus::new();
        bus.on("a", |_| Ok(()));
        bus.once("b", |_| Ok(()));
        bus.clear();
        assert!(!bus.has_listeners("a"));
        assert!(!bus.has_listeners("b"));
    }

    #[test]
    fn test_weak_handle_does_not_keep_bus_alive() {
        let bus = EventBus::new();
        let weak = bus.downgrade();
        assert!(weak.upgrade().is_some());
        drop(bus);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = EventBus::new();
        let sub = bus.on("evt", |_| Ok(()));
        drop(bus);
        assert!(!sub.unsubscribe());
    }
}
