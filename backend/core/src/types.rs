use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};
use crate::traits::RemoteModule;

/// Exposed-module key tried first when resolving an application's entry module.
pub const DEFAULT_EXPOSED_MODULE: &str = "./App";

/// Description of an independently deployed application, as produced by the
/// build/deploy pipeline.
///
/// Immutable once registered; the registry stores it behind an `Arc`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
    pub name: String,
    /// URL of the remote entry script.
    pub entry: String,
    /// Selector of the host container the application mounts into.
    pub container: String,
    pub routes: Vec<String>,
    #[serde(default)]
    pub exposed: BTreeMap<String, String>,
    /// Shared dependency names negotiated through the container scope.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// In-process module used instead of loading `entry` remotely.
    #[serde(skip)]
    pub lifecycle: Option<Arc<dyn RemoteModule>>,
}

impl ApplicationDescriptor {
    pub fn new(
        name: impl Into<String>,
        entry: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            container: container.into(),
            routes: Vec::new(),
            exposed: BTreeMap::new(),
            dependencies: Vec::new(),
            lifecycle: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.routes.push(route.into());
        self
    }

    pub fn expose(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.exposed.insert(name.into(), path.into());
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_lifecycle(mut self, module: Arc<dyn RemoteModule>) -> Self {
        self.lifecycle = Some(module);
        self
    }

    /// Check the fields every registration requires.
    pub fn validate(&self) -> HostResult<()> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.entry.trim().is_empty() && self.lifecycle.is_none() {
            missing.push("entry");
        }
        if self.container.trim().is_empty() {
            missing.push("container");
        }
        if self.routes.is_empty() {
            missing.push("routes");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HostError::Validation(format!(
                "application '{}' is missing required field(s): {}",
                self.name,
                missing.join(", ")
            )))
        }
    }

    /// The exposed module the orchestrator mounts: `./App` when exposed,
    /// otherwise the first exposed key.
    pub fn entry_module(&self) -> Option<&str> {
        if self.exposed.contains_key(DEFAULT_EXPOSED_MODULE) {
            return Some(DEFAULT_EXPOSED_MODULE);
        }
        self.exposed.keys().next().map(String::as_str)
    }
}

impl fmt::Debug for ApplicationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationDescriptor")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("container", &self.container)
            .field("routes", &self.routes)
            .field("exposed", &self.exposed)
            .field("dependencies", &self.dependencies)
            .field("inline", &self.lifecycle.is_some())
            .finish()
    }
}

/// Lifecycle state of a registered application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unregistered,
    Registered,
    Bootstrapped,
    Mounted,
    Unmounted,
}

impl LifecycleState {
    /// Whether bootstrap has completed for this application.
    pub fn is_bootstrapped(&self) -> bool {
        matches!(
            self,
            LifecycleState::Bootstrapped | LifecycleState::Mounted | LifecycleState::Unmounted
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Registered => "registered",
            LifecycleState::Bootstrapped => "bootstrapped",
            LifecycleState::Mounted => "mounted",
            LifecycleState::Unmounted => "unmounted",
        };
        write!(f, "{}", s)
    }
}

/// Cache key of a loaded remote module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleKey {
    pub remote: String,
    pub module: String,
}

impl ModuleKey {
    pub fn new(remote: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            module: module.into(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.module)
    }
}

/// Startup description of a remote, as supplied by a `ConfigService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub name: String,
    /// URL of the remote entry script.
    pub url: String,
    /// Container scope the script registers under.
    #[serde(default)]
    pub scope: String,
    /// Default exposed module.
    #[serde(default)]
    pub module: String,
}

impl RemoteConfig {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        scope: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            scope: scope.into(),
            module: module.into(),
        }
    }
}

/// A dependency offered to every remote container through the shared scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDependency {
    pub version: String,
    #[serde(default)]
    pub singleton: bool,
}

/// Shared scope handed to `RemoteContainer::init`.
pub type SharedScope = BTreeMap<String, SharedDependency>;

/// Everything a module receives when it is mounted or unmounted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountContext {
    pub app_name: String,
    pub container: String,
    /// Path that triggered the transition.
    pub path: String,
    pub props: serde_json::Value,
}

impl MountContext {
    pub fn new(
        app_name: impl Into<String>,
        container: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            container: container.into(),
            path: path.into(),
            props: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_validation_reports_missing_fields() {
        let desc = ApplicationDescriptor::new("shop", "", "");
        let err = desc.validate().unwrap_err();
        match err {
            HostError::Validation(msg) => {
                assert!(msg.contains("entry"));
                assert!(msg.contains("container"));
                assert!(msg.contains("routes"));
                assert!(!msg.contains("name,"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = serde_json::json!({
            "name": "shop",
            "entry": "https://cdn.example/shop/remoteEntry.js",
            "container": "#shop",
            "routes": ["/shop"],
            "exposed": {"./Widget": "./src/Widget", "./App": "./src/App"}
        });
        let desc: ApplicationDescriptor = serde_json::from_value(json).unwrap();
        assert!(desc.validate().is_ok());
        assert!(desc.dependencies.is_empty());
        assert!(desc.lifecycle.is_none());
        assert_eq!(desc.entry_module(), Some("./App"));
    }

    #[test]
    fn test_entry_module_falls_back_to_first_exposed() {
        let desc = ApplicationDescriptor::new("cart", "https://x/entry.js", "#cart")
            .expose("./Widget", "./src/Widget")
            .expose("./Badge", "./src/Badge");
        assert_eq!(desc.entry_module(), Some("./Badge"));
        let bare = ApplicationDescriptor::new("bare", "https://x/entry.js", "#bare");
        assert_eq!(bare.entry_module(), None);
    }

    #[test]
    fn test_lifecycle_state_display() {
        assert_eq!(LifecycleState::Bootstrapped.to_string(), "bootstrapped");
        assert!(LifecycleState::Unmounted.is_bootstrapped());
        assert!(!LifecycleState::Registered.is_bootstrapped());
    }

    #[test]
    fn test_module_key_display() {
        assert_eq!(ModuleKey::new("shop", "./Widget").to_string(), "shop/./Widget");
    }
}
