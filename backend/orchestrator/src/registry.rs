//! Application registry and route table.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use canopy_core::{ApplicationDescriptor, HostError, HostResult, LifecycleState};

use crate::route::{RouteMatch, RoutePattern};

struct RegisteredApp {
    descriptor: Arc<ApplicationDescriptor>,
    state: LifecycleState,
}

struct RouteEntry {
    pattern: RoutePattern,
    app: String,
    seq: u64,
}

/// Snapshot of one registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub name: String,
    pub container: String,
    pub routes: Vec<String>,
    pub state: LifecycleState,
    pub inline: bool,
}

#[derive(Default)]
pub struct Registry {
    apps: HashMap<String, RegisteredApp>,
    routes: Vec<RouteEntry>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor after validating it against the current table.
    ///
    /// Nothing is modified unless every check passes.
    pub fn register(
        &mut self,
        descriptor: ApplicationDescriptor,
    ) -> HostResult<Arc<ApplicationDescriptor>> {
        descriptor.validate()?;

        let mut patterns: Vec<RoutePattern> = Vec::with_capacity(descriptor.routes.len());
        for raw in &descriptor.routes {
            let pattern = RoutePattern::parse(raw)?;
            if !patterns.iter().any(|p| p.shape() == pattern.shape()) {
                patterns.push(pattern);
            }
        }

        if self.apps.contains_key(&descriptor.name) {
            return Err(HostError::DuplicateName(descriptor.name.clone()));
        }

        for pattern in &patterns {
            let shape = pattern.shape();
            if let Some(owner) = self.routes.iter().find(|r| r.pattern.shape() == shape) {
                return Err(HostError::RouteConflict {
                    route: pattern.to_string(),
                    existing: owner.app.clone(),
                    incoming: descriptor.name.clone(),
                });
            }
        }

        let descriptor = Arc::new(descriptor);
        for pattern in patterns {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.routes.push(RouteEntry {
                pattern,
                app: descriptor.name.clone(),
                seq,
            });
        }
        self.apps.insert(
            descriptor.name.clone(),
            RegisteredApp {
                descriptor: descriptor.clone(),
                state: LifecycleState::Registered,
            },
        );
        debug!(app = %descriptor.name, routes = descriptor.routes.len(), "Application registered");
        Ok(descriptor)
    }

    pub fn unregister(&mut self, name: &str) -> HostResult<Arc<ApplicationDescriptor>> {
        let app = self
            .apps
            .remove(name)
            .ok_or_else(|| HostError::AppNotFound(name.to_string()))?;
        self.routes.retain(|r| r.app != name);
        Ok(app.descriptor)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ApplicationDescriptor>> {
        self.apps.get(name).map(|a| a.descriptor.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    /// `Unregistered` for unknown names.
    pub fn state(&self, name: &str) -> LifecycleState {
        self.apps
            .get(name)
            .map(|a| a.state)
            .unwrap_or(LifecycleState::Unregistered)
    }

    /// Returns false if `name` is not registered.
    pub fn set_state(&mut self, name: &str, state: LifecycleState) -> bool {
        match self.apps.get_mut(name) {
            Some(app) => {
                app.state = state;
                true
            }
            None => false,
        }
    }

    /// Most specific route owning `path`.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter_map(|entry| entry.pattern.matches(path).map(|params| (entry, params)))
            .max_by(|(a, _), (b, _)| {
                a.pattern
                    .specificity()
                    .cmp(&b.pattern.specificity())
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(entry, params)| RouteMatch {
                app: entry.app.clone(),
                pattern: entry.pattern.to_string(),
                params,
            })
    }

    /// Route table as `(pattern, app)`, most specific first.
    pub fn routes(&self) -> Vec<(String, String)> {
        let mut entries: Vec<&RouteEntry> = self.routes.iter().collect();
        entries.sort_by(|a, b| {
            b.pattern
                .specificity()
                .cmp(&a.pattern.specificity())
                .then(a.seq.cmp(&b.seq))
        });
        entries
            .into_iter()
            .map(|e| (e.pattern.to_string(), e.app.clone()))
            .collect()
    }

    pub fn applications(&self) -> Vec<ApplicationInfo> {
        let mut apps: Vec<ApplicationInfo> = self
            .apps
            .values()
            .map(|a| ApplicationInfo {
                name: a.descriptor.name.clone(),
                container: a.descriptor.container.clone(),
                routes: a.descriptor.routes.clone(),
                state: a.state,
                inline: a.descriptor.lifecycle.is_some(),
            })
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str, routes: &[&str]) -> ApplicationDescriptor {
        let mut desc = ApplicationDescriptor::new(
            name,
            format!("https://cdn.example/{name}/remoteEntry.js"),
            format!("#{name}-root"),
        );
        for route in routes {
            desc = desc.with_route(*route);
        }
        desc
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = Registry::new();
        registry.register(app("shell", &["/"])).unwrap();
        registry.register(app("shop", &["/shop"])).unwrap();
        registry.register(app("orders", &["/shop/orders/:id"])).unwrap();

        assert_eq!(registry.resolve("/shop/cart").unwrap().app, "shop");
        let m = registry.resolve("/shop/orders/9").unwrap();
        assert_eq!(m.app, "orders");
        assert_eq!(m.params["id"], "9");
        assert_eq!(registry.resolve("/about").unwrap().app, "shell");
        assert_eq!(registry.state("shop"), LifecycleState::Registered);
    }

    #[test]
    fn test_duplicate_name_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        registry.register(app("shop", &["/shop"])).unwrap();
        let before = registry.routes();

        let err = registry.register(app("shop", &["/store"])).unwrap_err();
        assert_eq!(err, HostError::DuplicateName("shop".into()));
        assert_eq!(registry.routes(), before);
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("/store").is_none());
    }

    #[test]
    fn test_route_conflict_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        registry.register(app("shop", &["/shop/:id"])).unwrap();

        let err = registry
            .register(app("store", &["/store", "/shop/:sku"]))
            .unwrap_err();
        assert_eq!(
            err,
            HostError::RouteConflict {
                route: "/shop/:sku".into(),
                existing: "shop".into(),
                incoming: "store".into(),
            }
        );
        assert!(!registry.contains("store"));
        assert!(registry.resolve("/store").is_none());
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.register(app("shop", &[])),
            Err(HostError::Validation(_))
        ));
        assert!(matches!(
            registry.register(app("shop", &["shop"])),
            Err(HostError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_removes_routes() {
        let mut registry = Registry::new();
        registry.register(app("shop", &["/shop", "/cart"])).unwrap();
        registry.unregister("shop").unwrap();
        assert!(registry.resolve("/cart").is_none());
        assert_eq!(registry.state("shop"), LifecycleState::Unregistered);
        assert_eq!(
            registry.unregister("shop").unwrap_err(),
            HostError::AppNotFound("shop".into())
        );
        // The name and routes are free again.
        registry.register(app("shop", &["/shop"])).unwrap();
    }

    #[test]
    fn test_equal_specificity_prefers_first_registered() {
        let mut registry = Registry::new();
        registry.register(app("a", &["/docs/:page"])).unwrap();
        registry.register(app("b", &["/:section/intro"])).unwrap();
        assert_eq!(registry.resolve("/docs/intro").unwrap().app, "a");
        assert_eq!(registry.resolve("/blog/intro").unwrap().app, "b");
    }

    #[test]
    fn test_trailing_wildcard_conflicts_with_prefix_route() {
        let mut registry = Registry::new();
        registry.register(app("x", &["/a"])).unwrap();
        registry.register(app("root", &["/"])).unwrap();
        let before = registry.routes();

        for (name, route, owner) in [("y", "/a/*", "x"), ("any", "/*", "root")] {
            match registry.register(app(name, &[route])).unwrap_err() {
                HostError::RouteConflict { existing, incoming, .. } => {
                    assert_eq!(existing, owner);
                    assert_eq!(incoming, name);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(!registry.contains(name));
        }
        assert_eq!(registry.routes(), before);
        assert_eq!(registry.resolve("/a/b/c").unwrap().app, "x");
    }
}
