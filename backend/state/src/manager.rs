//! Shared state manager.
//!
//! Notifications fire synchronously, right after the commit that caused them.
//! Callbacks may update state again; chains deeper than `max_update_depth`
//! on one thread fail with `HostError::StateRecursion` instead of looping.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use canopy_core::sync::{lock, panic_message};
use canopy_core::{state_updated_event, EventBus, HostError, HostResult};

use crate::slices::{
    NavigationPatch, Notification, NotificationLevel, NotificationsPatch, SharedState,
    StateSlice, ThemePatch, UserPatch,
};

/// Maximum nesting of updates issued from inside notification callbacks.
pub const DEFAULT_MAX_UPDATE_DEPTH: usize = 16;

/// Callback invoked with a copy of the committed state.
pub type SliceCallback = Arc<dyn Fn(&SharedState) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateSubscriptionId(u64);

thread_local! {
    static UPDATE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tracks update nesting on the current thread for the lifetime of one update.
struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> HostResult<Self> {
        UPDATE_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > max_depth {
                return Err(HostError::StateRecursion(max_depth));
            }
            depth.set(next);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        UPDATE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

struct StateInner {
    state: Mutex<SharedState>,
    subscribers: Mutex<HashMap<StateSlice, Vec<(StateSubscriptionId, SliceCallback)>>>,
    bus: EventBus,
    max_depth: usize,
    next_id: AtomicU64,
}

/// Owner of the single mutable `SharedState`. Cloning yields another handle.
#[derive(Clone)]
pub struct SharedStateManager {
    inner: Arc<StateInner>,
}

impl SharedStateManager {
    pub fn new(bus: EventBus) -> Self {
        Self::with_max_depth(bus, DEFAULT_MAX_UPDATE_DEPTH)
    }

    pub fn with_max_depth(bus: EventBus, max_depth: usize) -> Self {
        Self {
            inner: Arc::new(StateInner {
                state: Mutex::new(SharedState::default()),
                subscribers: Mutex::new(HashMap::new()),
                bus,
                max_depth: max_depth.max(1),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Defensive copy of the current state.
    pub fn get_state(&self) -> SharedState {
        lock(&self.inner.state).clone()
    }

    pub fn get_slice(&self, slice: StateSlice) -> Value {
        lock(&self.inner.state).slice_json(slice)
    }

    /// Register a callback for commits to `slice` only.
    pub fn subscribe<F>(&self, slice: StateSlice, callback: F) -> StateSubscriptionId
    where
        F: Fn(&SharedState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = StateSubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.subscribers)
            .entry(slice)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: StateSubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        let mut removed = false;
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, slice: StateSlice) -> usize {
        lock(&self.inner.subscribers)
            .get(&slice)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Shallow-merge the keys of `partial` into `slice`.
    ///
    /// `partial` must be a JSON object whose merged result is a valid slice;
    /// otherwise nothing is committed.
    pub fn update(&self, slice: StateSlice, partial: Value) -> HostResult<SharedState> {
        let Value::Object(patch) = partial else {
            return Err(HostError::Validation(format!(
                "update of '{}' requires an object",
                slice
            )));
        };
        self.commit(slice, |state| merge_slice(state, slice, patch))
    }

    pub fn update_user(&self, patch: UserPatch) -> HostResult<SharedState> {
        self.update(StateSlice::User, to_patch_value(&patch)?)
    }

    pub fn update_theme(&self, patch: ThemePatch) -> HostResult<SharedState> {
        self.update(StateSlice::Theme, to_patch_value(&patch)?)
    }

    pub fn update_navigation(&self, patch: NavigationPatch) -> HostResult<SharedState> {
        self.update(StateSlice::Navigation, to_patch_value(&patch)?)
    }

    pub fn update_notifications(&self, patch: NotificationsPatch) -> HostResult<SharedState> {
        self.update(StateSlice::Notifications, to_patch_value(&patch)?)
    }

    /// Append a notification and return its id.
    pub fn add_notification(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        source: Option<String>,
    ) -> HostResult<String> {
        let id = Uuid::new_v4().to_string();
        let notification = Notification {
            id: id.clone(),
            level,
            message: message.into(),
            source,
            read: false,
            created_at: Utc::now(),
        };
        self.commit(StateSlice::Notifications, |state| {
            state.notifications.items.push(notification);
            Ok(())
        })?;
        Ok(id)
    }

    /// Remove a notification. Returns false if no notification had that id.
    pub fn dismiss_notification(&self, id: &str) -> HostResult<bool> {
        if !lock(&self.inner.state)
            .notifications
            .items
            .iter()
            .any(|n| n.id == id)
        {
            return Ok(false);
        }
        self.commit(StateSlice::Notifications, |state| {
            state.notifications.items.retain(|n| n.id != id);
            Ok(())
        })?;
        Ok(true)
    }

    pub fn mark_all_read(&self) -> HostResult<SharedState> {
        self.commit(StateSlice::Notifications, |state| {
            for n in &mut state.notifications.items {
                n.read = true;
            }
            Ok(())
        })
    }

    /// Restore every slice to its default, notifying all slice subscribers.
    pub fn reset(&self) -> SharedState {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            *state = SharedState::default();
            state.clone()
        };
        debug!("Shared state reset");
        for slice in StateSlice::ALL {
            self.notify(slice, &snapshot);
        }
        snapshot
    }

    /// Apply `mutate` to a copy of the state, commit it, then notify.
    fn commit<F>(&self, slice: StateSlice, mutate: F) -> HostResult<SharedState>
    where
        F: FnOnce(&mut SharedState) -> HostResult<()>,
    {
        let _depth = DepthGuard::enter(self.inner.max_depth).inspect_err(|e| {
            error!(slice = %slice, error = %e, "Recursive state update chain stopped");
        })?;

        let snapshot = {
            let mut state = lock(&self.inner.state);
            let mut next = state.clone();
            mutate(&mut next)?;
            next.notifications.recount();
            *state = next;
            state.clone()
        };
        debug!(slice = %slice, "Shared state committed");

        self.notify(slice, &snapshot);
        Ok(snapshot)
    }

    fn notify(&self, slice: StateSlice, snapshot: &SharedState) {
        let callbacks: Vec<SliceCallback> = lock(&self.inner.subscribers)
            .get(&slice)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(slice = %slice, error = %e, "State subscriber failed");
                }
                Err(payload) => {
                    error!(
                        slice = %slice,
                        panic = %panic_message(payload.as_ref()),
                        "State subscriber panicked"
                    );
                }
            }
        }

        self.inner
            .bus
            .emit(&state_updated_event(slice.as_str()), &snapshot.slice_json(slice));
    }
}

fn to_patch_value<T: serde::Serialize>(patch: &T) -> HostResult<Value> {
    serde_json::to_value(patch).map_err(|e| HostError::Validation(e.to_string()))
}

fn merge_slice(state: &mut SharedState, slice: StateSlice, patch: Map<String, Value>) -> HostResult<()> {
    let mut current = state.slice_json(slice);
    if let Value::Object(map) = &mut current {
        for (key, value) in patch {
            map.insert(key, value);
        }
    }
    let invalid = |e: serde_json::Error| {
        HostError::Validation(format!("invalid update for slice '{}': {}", slice, e))
    };
    match slice {
        StateSlice::User => state.user = serde_json::from_value(current).map_err(invalid)?,
        StateSlice::Theme => state.theme = serde_json::from_value(current).map_err(invalid)?,
        StateSlice::Navigation => {
            state.navigation = serde_json::from_value(current).map_err(invalid)?
        }
        StateSlice::Notifications => {
            state.notifications = serde_json::from_value(current).map_err(invalid)?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slices::ThemeMode;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter(manager: &SharedStateManager, slice: StateSlice) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        manager.subscribe(slice, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    #[test]
    fn test_update_theme_notifies_only_theme_subscribers() {
        let manager = SharedStateManager::new(EventBus::new());
        let theme = counter(&manager, StateSlice::Theme);
        let user = counter(&manager, StateSlice::User);
        let navigation = counter(&manager, StateSlice::Navigation);

        manager.update_theme(ThemePatch::mode(ThemeMode::Dark)).unwrap();

        assert_eq!(manager.get_state().theme.mode, ThemeMode::Dark);
        assert_eq!(theme.load(Ordering::SeqCst), 1);
        assert_eq!(user.load(Ordering::SeqCst), 0);
        assert_eq!(navigation.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_is_shallow_merge() {
        let manager = SharedStateManager::new(EventBus::new());
        manager
            .update(StateSlice::Theme, json!({"primaryColor": "#ff0000"}))
            .unwrap();
        let state = manager.update(StateSlice::Theme, json!({"mode": "dark"})).unwrap();
        assert_eq!(state.theme.primary_color, "#ff0000");
        assert_eq!(state.theme.mode, ThemeMode::Dark);
        assert_eq!(state.theme.font_scale, 1.0);
    }

    #[test]
    fn test_invalid_update_commits_nothing() {
        let manager = SharedStateManager::new(EventBus::new());
        let theme = counter(&manager, StateSlice::Theme);
        let err = manager
            .update(StateSlice::Theme, json!({"mode": "neon"}))
            .unwrap_err();
        assert!(matches!(err, HostError::Validation(_)));
        assert!(manager.update(StateSlice::Theme, json!("dark")).is_err());
        assert_eq!(manager.get_state().theme.mode, ThemeMode::Light);
        assert_eq!(theme.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscriber_sees_committed_state() {
        let manager = SharedStateManager::new(EventBus::new());
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let m = manager.clone();
        manager.subscribe(StateSlice::User, move |snapshot| {
            // The snapshot and a fresh read agree: the commit happened first.
            assert_eq!(snapshot.user, m.get_state().user);
            *s.lock().unwrap() = snapshot.user.name.clone();
            Ok(())
        });
        manager
            .update_user(UserPatch {
                name: Some("Ada".into()),
                authenticated: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Ada"));
    }

    #[test]
    fn test_get_state_is_defensive_copy() {
        let manager = SharedStateManager::new(EventBus::new());
        let mut copy = manager.get_state();
        copy.theme.mode = ThemeMode::Dark;
        assert_eq!(manager.get_state().theme.mode, ThemeMode::Light);
    }

    #[test]
    fn test_bus_event_emitted_for_slice() {
        let bus = EventBus::new();
        let manager = SharedStateManager::new(bus.clone());
        let payload = Arc::new(Mutex::new(Value::Null));
        let p = payload.clone();
        bus.on("state:theme:updated", move |v| {
            *p.lock().unwrap() = v.clone();
            Ok(())
        });
        let user_events = Arc::new(AtomicUsize::new(0));
        let u = user_events.clone();
        bus.on("state:user:updated", move |_| {
            u.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        manager.update_theme(ThemePatch::mode(ThemeMode::Dark)).unwrap();
        assert_eq!(payload.lock().unwrap()["mode"], "dark");
        assert_eq!(user_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recursive_updates_are_capped() {
        let manager = SharedStateManager::with_max_depth(EventBus::new(), 4);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let m = manager.clone();
        manager.subscribe(StateSlice::Theme, move |state| {
            c.fetch_add(1, Ordering::SeqCst);
            let next = state.theme.font_scale + 1.0;
            m.update(StateSlice::Theme, json!({"fontScale": next}))?;
            Ok(())
        });

        manager.update(StateSlice::Theme, json!({"fontScale": 1.0})).unwrap();
        // Depth 1..=4 commit and notify; the fifth nested update is refused.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(manager.get_state().theme.font_scale, 4.0);

        // The guard unwinds fully, so later top-level updates still work.
        manager.update(StateSlice::User, json!({"name": "x"})).unwrap();
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let manager = SharedStateManager::new(EventBus::new());
        manager.subscribe(StateSlice::Theme, |_| anyhow::bail!("broken widget"));
        manager.subscribe(StateSlice::Theme, |_| panic!("worse widget"));
        let ok = counter(&manager, StateSlice::Theme);
        assert!(manager.update_theme(ThemePatch::mode(ThemeMode::System)).is_ok());
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notifications_lifecycle() {
        let manager = SharedStateManager::new(EventBus::new());
        let first = manager
            .add_notification(NotificationLevel::Info, "Order shipped", Some("shop".into()))
            .unwrap();
        manager
            .add_notification(NotificationLevel::Error, "Payment failed", None)
            .unwrap();
        assert_eq!(manager.get_state().notifications.unread_count, 2);

        assert!(manager.dismiss_notification(&first).unwrap());
        assert!(!manager.dismiss_notification("missing").unwrap());
        assert_eq!(manager.get_state().notifications.items.len(), 1);

        let state = manager.mark_all_read().unwrap();
        assert_eq!(state.notifications.unread_count, 0);
    }

    #[test]
    fn test_unsubscribe_and_reset() {
        let manager = SharedStateManager::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = manager.subscribe(StateSlice::Navigation, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        manager
            .update_navigation(NavigationPatch {
                current_path: Some("/shop".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        manager.reset();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(manager.get_state().navigation.current_path.is_none());

        assert!(manager.unsubscribe(id));
        assert_eq!(manager.subscriber_count(StateSlice::Navigation), 0);
    }
}
