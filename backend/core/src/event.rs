use serde::{Deserialize, Serialize};

/// Well-known events the host runtime emits on the `EventBus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HostEvent {
    /// An application was added to the registry
    #[serde(rename = "app:registered")]
    AppRegistered,
    /// An application was removed from the registry
    #[serde(rename = "app:unregistered")]
    AppUnregistered,
    /// An application's bootstrap hook completed
    #[serde(rename = "app:bootstrapped")]
    AppBootstrapped,
    /// An application was mounted into its container
    #[serde(rename = "app:mounted")]
    AppMounted,
    /// An application was detached from its container
    #[serde(rename = "app:unmounted")]
    AppUnmounted,
    /// A navigation completed
    #[serde(rename = "navigation:changed")]
    NavigationChanged,
    /// A navigation failed; hosts render their fallback UI from this
    #[serde(rename = "navigation:error")]
    NavigationError,
    /// A remote module finished loading
    #[serde(rename = "remote:loaded")]
    RemoteLoaded,
    /// A remote module failed to load
    #[serde(rename = "remote:load-failed")]
    RemoteLoadFailed,
}

impl HostEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostEvent::AppRegistered => "app:registered",
            HostEvent::AppUnregistered => "app:unregistered",
            HostEvent::AppBootstrapped => "app:bootstrapped",
            HostEvent::AppMounted => "app:mounted",
            HostEvent::AppUnmounted => "app:unmounted",
            HostEvent::NavigationChanged => "navigation:changed",
            HostEvent::NavigationError => "navigation:error",
            HostEvent::RemoteLoaded => "remote:loaded",
            HostEvent::RemoteLoadFailed => "remote:load-failed",
        }
    }
}

impl std::fmt::Display for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event a shared-state slice announces its commits on.
pub fn state_updated_event(slice: &str) -> String {
    format!("state:{}:updated", slice)
}

/// Event an in-process request for `action` on `target` is emitted on.
pub fn request_event(target: &str, action: &str) -> String {
    format!("{}:{}", target, action)
}

/// Event queued messages for `target` are flushed on.
pub fn queued_event(target: &str) -> String {
    format!("{}:queued", target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_event_names_match_serde() {
        for event in [
            HostEvent::AppRegistered,
            HostEvent::AppMounted,
            HostEvent::NavigationError,
            HostEvent::RemoteLoadFailed,
        ] {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json.as_str(), Some(event.as_str()));
        }
    }

    #[test]
    fn test_event_name_helpers() {
        assert_eq!(state_updated_event("theme"), "state:theme:updated");
        assert_eq!(request_event("svc", "ping"), "svc:ping");
        assert_eq!(queued_event("cart"), "cart:queued");
        assert_eq!(HostEvent::NavigationChanged.to_string(), "navigation:changed");
    }
}
