//! Host Event Logger
//!
//! Subscribes to the runtime's lifecycle events and records each one as a
//! structured, redacted log entry under the `host_events` target.

use canopy_core::{EventBus, HostEvent, Subscription};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::redact::redact_value;

const LOGGED_EVENTS: &[HostEvent] = &[
    HostEvent::AppRegistered,
    HostEvent::AppUnregistered,
    HostEvent::AppBootstrapped,
    HostEvent::AppMounted,
    HostEvent::AppUnmounted,
    HostEvent::NavigationChanged,
    HostEvent::NavigationError,
    HostEvent::RemoteLoaded,
    HostEvent::RemoteLoadFailed,
];

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl EventLogEntry {
    pub fn new(event: &str, payload: &Value) -> Self {
        Self {
            event: event.to_string(),
            timestamp: Utc::now(),
            payload: redact_value(payload),
        }
    }
}

/// Keeps the bus subscriptions alive; `detach` removes them.
pub struct EventLogger {
    subscriptions: Vec<Subscription>,
}

impl EventLogger {
    /// Start logging every lifecycle event emitted on `bus`.
    pub fn attach(bus: &EventBus) -> Self {
        let subscriptions = LOGGED_EVENTS
            .iter()
            .map(|event| {
                let name = event.as_str();
                bus.on(name, move |payload| {
                    let entry = EventLogEntry::new(name, payload);
                    let json = serde_json::to_string(&entry)?;
                    info!(target: "host_events", event = %entry.event, entry = %json, "Host event");
                    Ok(())
                })
            })
            .collect();
        Self { subscriptions }
    }

    pub fn detach(self) -> usize {
        self.subscriptions
            .into_iter()
            .map(Subscription::unsubscribe)
            .filter(|removed| *removed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attach_and_detach() {
        let bus = EventBus::new();
        let logger = EventLogger::attach(&bus);
        assert!(bus.has_listeners("app:mounted"));
        assert_eq!(bus.emit_host(HostEvent::AppMounted, &json!({"app": "shop"})), 1);
        assert_eq!(logger.detach(), LOGGED_EVENTS.len());
        assert!(!bus.has_listeners("app:mounted"));
    }

    #[test]
    fn test_entry_payload_is_redacted() {
        let entry = EventLogEntry::new("app:mounted", &json!({"token": "secret"}));
        assert_eq!(entry.payload["token"], "[REDACTED]");
    }
}
