//! Cross-application shared state.
//!
//! One snapshot composed of independent slices. Every mutation targets exactly
//! one slice, is committed before any notification fires, and only notifies
//! that slice's subscribers.

pub mod manager;
pub mod slices;

pub use manager::{SharedStateManager, SliceCallback, StateSubscriptionId, DEFAULT_MAX_UPDATE_DEPTH};
pub use slices::{
    NavigationPatch, NavigationState, Notification, NotificationLevel, NotificationsPatch,
    NotificationsState, SharedState, StateSlice, ThemeMode, ThemePatch, ThemeState, UserPatch,
    UserState,
};
