use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names of the independently updatable parts of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSlice {
    User,
    Theme,
    Navigation,
    Notifications,
}

impl StateSlice {
    pub const ALL: [StateSlice; 4] = [
        StateSlice::User,
        StateSlice::Theme,
        StateSlice::Navigation,
        StateSlice::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateSlice::User => "user",
            StateSlice::Theme => "theme",
            StateSlice::Navigation => "navigation",
            StateSlice::Notifications => "notifications",
        }
    }
}

impl fmt::Display for StateSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authenticated user, as far as hosted applications need to know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeState {
    pub mode: ThemeMode,
    pub primary_color: String,
    pub font_scale: f64,
}

impl Default for ThemeState {
    fn default() -> Self {
        Self {
            mode: ThemeMode::Light,
            primary_color: "#1976d2".to_string(),
            font_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub current_path: Option<String>,
    pub previous_path: Option<String>,
    pub active_app: Option<String>,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub level: NotificationLevel,
    pub message: String,
    /// Application that raised the notification.
    pub source: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsState {
    #[serde(default)]
    pub items: Vec<Notification>,
    /// Derived from `items`; recomputed on every commit.
    #[serde(default)]
    pub unread_count: usize,
}

impl NotificationsState {
    pub(crate) fn recount(&mut self) {
        self.unread_count = self.items.iter().filter(|n| !n.read).count();
    }
}

/// Snapshot of all state shared across application boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub user: UserState,
    pub theme: ThemeState,
    pub navigation: NavigationState,
    pub notifications: NotificationsState,
}

impl SharedState {
    /// JSON form of one slice.
    pub fn slice_json(&self, slice: StateSlice) -> Value {
        let value = match slice {
            StateSlice::User => serde_json::to_value(&self.user),
            StateSlice::Theme => serde_json::to_value(&self.theme),
            StateSlice::Navigation => serde_json::to_value(&self.navigation),
            StateSlice::Notifications => serde_json::to_value(&self.notifications),
        };
        value.unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Typed partial updates. Fields left `None` keep their current value.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThemeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_scale: Option<f64>,
}

impl ThemePatch {
    pub fn mode(mode: ThemeMode) -> Self {
        Self {
            mode: Some(mode),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Notification>>,
}
