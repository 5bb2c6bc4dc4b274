//! Host orchestrator.
//!
//! Owns the registry, the loader, the shared state and the messaging layer of
//! one host. Every mount/unmount goes through a single transition queue
//! (`tokio::sync::Mutex`, FIFO), so overlapping navigations run one after the
//! other and at most one application is mounted at any time. A transition
//! runs on its own task once it holds the queue, so a caller that stops
//! waiting (a timeout, a dropped future) never leaves it half done.
//!
//! Lifecycle hooks are user code: their errors and panics are converted to
//! `HostError` here and never abort the host. Hooks must not call back into
//! `route_to` or `unregister_application`; the transition queue is not
//! re-entrant.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use canopy_core::sync::{lock, panic_message};
use canopy_core::{
    ApplicationDescriptor, ConfigService, EventBus, HostError, HostEvent, HostResult,
    HostSurface, LifecycleState, ModuleRef, ModuleRegistry, MountContext, RemoteConfig,
    SharedScope, SingleFlight, DEFAULT_EXPOSED_MODULE,
};
use canopy_loader::RemoteLoader;
use canopy_messaging::{CrossAppCommunication, PostMessageBridge, DEFAULT_REQUEST_TIMEOUT};
use canopy_state::{SharedStateManager, StateSlice, DEFAULT_MAX_UPDATE_DEPTH};

use crate::registry::{ApplicationInfo, Registry};
use crate::route::RouteMatch;

pub struct OrchestratorBuilder {
    modules: Arc<dyn ModuleRegistry>,
    surface: Arc<dyn HostSurface>,
    bus: Option<EventBus>,
    bridge: Option<PostMessageBridge>,
    max_update_depth: usize,
    request_timeout: Duration,
    shared: SharedScope,
}

impl OrchestratorBuilder {
    pub fn new(modules: Arc<dyn ModuleRegistry>, surface: Arc<dyn HostSurface>) -> Self {
        Self {
            modules,
            surface,
            bus: None,
            bridge: None,
            max_update_depth: DEFAULT_MAX_UPDATE_DEPTH,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shared: SharedScope::new(),
        }
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Cross-origin bridge owned by the orchestrator; destroyed with it.
    pub fn bridge(mut self, bridge: PostMessageBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn max_update_depth(mut self, depth: usize) -> Self {
        self.max_update_depth = depth;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn shared_scope(mut self, shared: SharedScope) -> Self {
        self.shared = shared;
        self
    }

    pub fn build(self) -> Orchestrator {
        let bus = self.bus.unwrap_or_default();
        let loader = RemoteLoader::with_bus(self.modules, &bus);
        loader.set_shared_scope(self.shared);
        Orchestrator {
            inner: Arc::new(OrchestratorInner {
                state: SharedStateManager::with_max_depth(bus.clone(), self.max_update_depth),
                comm: CrossAppCommunication::with_default_timeout(
                    bus.clone(),
                    self.request_timeout,
                ),
                bridge: self.bridge,
                loader,
                surface: self.surface,
                registry: RwLock::new(Registry::new()),
                modules: Mutex::new(HashMap::new()),
                bootstraps: SingleFlight::new(),
                transition: Arc::new(tokio::sync::Mutex::new(None)),
                active_name: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                bus,
            }),
        }
    }
}

type ActiveSlot = OwnedMutexGuard<Option<ActiveApp>>;

struct ActiveApp {
    name: String,
    container: String,
    path: String,
    module: ModuleRef,
}

struct OrchestratorInner {
    bus: EventBus,
    state: SharedStateManager,
    comm: CrossAppCommunication,
    bridge: Option<PostMessageBridge>,
    loader: RemoteLoader,
    surface: Arc<dyn HostSurface>,
    registry: RwLock<Registry>,
    /// Bootstrapped module per application, for the application's lifetime.
    modules: Mutex<HashMap<String, ModuleRef>>,
    bootstraps: SingleFlight<String, ModuleRef>,
    transition: Arc<tokio::sync::Mutex<Option<ActiveApp>>>,
    /// Mirror of the transition slot readable without awaiting the queue.
    active_name: Mutex<Option<String>>,
    destroyed: AtomicBool,
}

/// One explicit instance per host. Cloning yields another handle.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    pub fn builder(modules: Arc<dyn ModuleRegistry>, surface: Arc<dyn HostSurface>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(modules, surface)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn state(&self) -> &SharedStateManager {
        &self.inner.state
    }

    pub fn messaging(&self) -> &CrossAppCommunication {
        &self.inner.comm
    }

    pub fn bridge(&self) -> Option<&PostMessageBridge> {
        self.inner.bridge.as_ref()
    }

    pub fn loader(&self) -> &RemoteLoader {
        &self.inner.loader
    }

    /// Validate and add an application. A rejected registration changes
    /// nothing.
    pub fn register_application(&self, descriptor: ApplicationDescriptor) -> HostResult<()> {
        self.ensure_active()?;
        let desc = self.inner.registry_write().register(descriptor)?;

        if desc.lifecycle.is_none() && !self.inner.loader.has_remote(&desc.name) {
            let module = desc.entry_module().unwrap_or(DEFAULT_EXPOSED_MODULE);
            let remote = RemoteConfig::new(&desc.name, &desc.entry, &desc.name, module);
            if let Err(e) = self.inner.loader.register_remote(remote) {
                let _ = self.inner.registry_write().unregister(&desc.name);
                return Err(e);
            }
        }

        info!(app = %desc.name, routes = ?desc.routes, container = %desc.container, "Application registered");
        self.inner.bus.emit_host(
            HostEvent::AppRegistered,
            &json!({ "app": desc.name, "routes": desc.routes, "container": desc.container }),
        );
        Ok(())
    }

    /// Remove an application, unmounting it first if it is active.
    pub async fn unregister_application(&self, name: &str) -> HostResult<()> {
        self.ensure_active()?;
        let active = self.inner.transition.clone().lock_owned().await;
        let inner = self.inner.clone();
        let name = name.to_string();
        run_transition(async move { inner.remove_application(active, &name).await }).await
    }

    /// Navigate to `path`: unmount the active application, bootstrap the
    /// owner of `path` if needed, then mount it.
    pub async fn route_to(&self, path: &str) -> HostResult<RouteMatch> {
        self.ensure_active()?;
        let active = self.inner.transition.clone().lock_owned().await;
        let inner = self.inner.clone();
        let path = path.to_string();
        run_transition(async move { inner.navigate(active, &path).await }).await
    }

    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        self.inner.registry_read().resolve(path)
    }

    pub fn routes(&self) -> Vec<(String, String)> {
        self.inner.registry_read().routes()
    }

    pub fn application_state(&self, name: &str) -> LifecycleState {
        self.inner.registry_read().state(name)
    }

    pub fn active_application(&self) -> Option<String> {
        lock(&self.inner.active_name).clone()
    }

    pub fn applications(&self) -> Vec<ApplicationInfo> {
        self.inner.registry_read().applications()
    }

    /// Load an application's module ahead of navigation. Load failures are
    /// logged and reported as `false`.
    pub async fn preload_application(&self, name: &str) -> HostResult<bool> {
        let desc = self
            .inner
            .registry_read()
            .get(name)
            .ok_or_else(|| HostError::AppNotFound(name.to_string()))?;
        if desc.lifecycle.is_some() {
            return Ok(true);
        }
        let module = desc.entry_module().unwrap_or(DEFAULT_EXPOSED_MODULE);
        Ok(self.inner.loader.preload_remote(&desc.name, module).await)
    }

    /// Register every remote the config service knows about. Invalid entries
    /// are skipped with a warning. Returns how many were registered.
    pub async fn seed_remotes(&self, service: &dyn ConfigService) -> HostResult<usize> {
        self.ensure_active()?;
        let remotes = service
            .remotes()
            .await
            .map_err(|e| HostError::Handler(format!("config service failed: {:#}", e)))?;
        let mut seeded = 0;
        for remote in remotes {
            let name = remote.name.clone();
            match self.inner.loader.register_remote(remote) {
                Ok(()) => seeded += 1,
                Err(e) => warn!(remote = %name, error = %e, "Skipping invalid remote"),
            }
        }
        info!(seeded, "Remotes seeded");
        Ok(seeded)
    }

    /// Unmount the active application, destroy the bridge, reject pending
    /// requests and drop every bus subscription. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let active = self.inner.transition.clone().lock_owned().await;
        let inner = self.inner.clone();
        let teardown = run_transition(async move {
            inner.teardown(active).await;
            Ok(())
        });
        if let Err(e) = teardown.await {
            warn!(error = %e, "Orchestrator teardown failed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> HostResult<()> {
        if self.is_destroyed() {
            return Err(HostError::Destroyed("orchestrator".to_string()));
        }
        Ok(())
    }
}

impl OrchestratorInner {
    fn registry_read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, name: &str, state: LifecycleState) {
        if !self.registry_write().set_state(name, state) {
            debug!(app = %name, state = %state, "State change for unregistered application ignored");
        }
    }

    async fn navigate(self: Arc<Self>, mut active: ActiveSlot, path: &str) -> HostResult<RouteMatch> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HostError::Destroyed("orchestrator".to_string()));
        }
        let matched = self
            .registry_read()
            .resolve(path)
            .ok_or_else(|| HostError::RouteNotFound(path.to_string()))?;
        let desc = self
            .registry_read()
            .get(&matched.app)
            .ok_or_else(|| HostError::AppNotFound(matched.app.clone()))?;
        let previous_path = self.state.get_state().navigation.current_path;

        if let Some(current) = active.as_mut() {
            if current.name == desc.name {
                debug!(app = %desc.name, path = %path, "Already mounted; updating navigation only");
                current.path = path.to_string();
                self.record_navigation(path, previous_path, &desc.name);
                return Ok(matched);
            }
        }

        if let Some(previous) = active.take() {
            self.unmount(previous).await;
            *lock(&self.active_name) = None;
        }

        match self.mount(&desc, path, &matched).await {
            Ok(module) => {
                *active = Some(ActiveApp {
                    name: desc.name.clone(),
                    container: desc.container.clone(),
                    path: path.to_string(),
                    module,
                });
                *lock(&self.active_name) = Some(desc.name.clone());
                self.record_navigation(path, previous_path, &desc.name);
                Ok(matched)
            }
            Err(e) => {
                warn!(app = %desc.name, path = %path, error = %e, "Navigation failed");
                self.clear_active_app();
                self.bus.emit_host(
                    HostEvent::NavigationError,
                    &json!({ "path": path, "app": desc.name, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn remove_application(self: Arc<Self>, mut active: ActiveSlot, name: &str) -> HostResult<()> {
        if !self.registry_read().contains(name) {
            return Err(HostError::AppNotFound(name.to_string()));
        }

        if active.as_ref().map(|a| a.name == name).unwrap_or(false) {
            if let Some(previous) = active.take() {
                self.unmount(previous).await;
            }
            *lock(&self.active_name) = None;
            self.clear_active_app();
        }

        let desc = self.registry_write().unregister(name)?;
        lock(&self.modules).remove(name);
        self.bootstraps.forget(&desc.name);
        if desc.lifecycle.is_none() {
            self.loader.unload_remote(name);
        }

        info!(app = %name, "Application unregistered");
        self.bus
            .emit_host(HostEvent::AppUnregistered, &json!({ "app": name }));
        Ok(())
    }

    async fn teardown(self: Arc<Self>, mut active: ActiveSlot) {
        if let Some(previous) = active.take() {
            self.unmount(previous).await;
        }
        *lock(&self.active_name) = None;
        if let Some(bridge) = &self.bridge {
            bridge.destroy();
        }
        self.comm.destroy();
        self.bus.clear();
        info!("Orchestrator destroyed");
    }

    async fn mount(
        self: &Arc<Self>,
        desc: &Arc<ApplicationDescriptor>,
        path: &str,
        matched: &RouteMatch,
    ) -> HostResult<ModuleRef> {
        let module = self.ensure_bootstrapped(desc.clone()).await?;

        if !self.surface.has_container(&desc.container) {
            self.set_state(&desc.name, LifecycleState::Bootstrapped);
            return Err(HostError::ContainerNotFound {
                app: desc.name.clone(),
                selector: desc.container.clone(),
            });
        }

        let mut ctx = MountContext::new(&desc.name, &desc.container, path);
        ctx.props = json!({ "params": matched.params, "pattern": matched.pattern });
        if let Err(e) = run_hook(module.mount(&ctx)).await {
            self.set_state(&desc.name, LifecycleState::Bootstrapped);
            return Err(HostError::Mount {
                app: desc.name.clone(),
                message: format!("{:#}", e),
            });
        }

        self.set_state(&desc.name, LifecycleState::Mounted);
        info!(app = %desc.name, container = %desc.container, path = %path, "Application mounted");
        self.bus.emit_host(
            HostEvent::AppMounted,
            &json!({ "app": desc.name, "container": desc.container, "path": path }),
        );
        Ok(module)
    }

    /// Best effort: a failing hook is logged and the app still counts as
    /// unmounted.
    async fn unmount(&self, previous: ActiveApp) {
        let ctx = MountContext::new(&previous.name, &previous.container, &previous.path);
        let outcome = run_hook(previous.module.unmount(&ctx)).await;
        match &outcome {
            Ok(()) => debug!(app = %previous.name, "Application unmounted"),
            Err(e) => warn!(app = %previous.name, error = %format!("{:#}", e), "Unmount failed; continuing"),
        }
        self.set_state(&previous.name, LifecycleState::Unmounted);
        self.bus.emit_host(
            HostEvent::AppUnmounted,
            &json!({ "app": previous.name, "clean": outcome.is_ok() }),
        );
    }

    async fn ensure_bootstrapped(
        self: &Arc<Self>,
        desc: Arc<ApplicationDescriptor>,
    ) -> HostResult<ModuleRef> {
        if let Some(module) = lock(&self.modules).get(&desc.name) {
            return Ok(module.clone());
        }
        let inner = self.clone();
        let name = desc.name.clone();
        self.bootstraps
            .run(name, move || async move { inner.bootstrap(desc).await })
            .await
    }

    async fn bootstrap(self: Arc<Self>, desc: Arc<ApplicationDescriptor>) -> HostResult<ModuleRef> {
        if let Some(module) = lock(&self.modules).get(&desc.name) {
            return Ok(module.clone());
        }

        let module = match &desc.lifecycle {
            Some(module) => module.clone(),
            None => {
                let exposed = desc.entry_module().unwrap_or(DEFAULT_EXPOSED_MODULE);
                self.loader.load_remote(&desc.name, exposed).await?
            }
        };

        run_hook(module.bootstrap())
            .await
            .map_err(|e| HostError::Mount {
                app: desc.name.clone(),
                message: format!("bootstrap failed: {:#}", e),
            })?;

        {
            let mut registry = self.registry_write();
            if !registry.contains(&desc.name) {
                debug!(app = %desc.name, "Application unregistered during bootstrap");
                return Ok(module);
            }
            if registry.state(&desc.name) == LifecycleState::Registered {
                registry.set_state(&desc.name, LifecycleState::Bootstrapped);
            }
        }
        lock(&self.modules).insert(desc.name.clone(), module.clone());

        info!(app = %desc.name, module = %module.name(), "Application bootstrapped");
        self.bus
            .emit_host(HostEvent::AppBootstrapped, &json!({ "app": desc.name }));
        Ok(module)
    }

    fn record_navigation(&self, path: &str, previous_path: Option<String>, app: &str) {
        let patch = json!({
            "currentPath": path,
            "previousPath": previous_path,
            "activeApp": app,
            "updatedAt": Utc::now(),
        });
        if let Err(e) = self.state.update(StateSlice::Navigation, patch) {
            warn!(path = %path, error = %e, "Failed to record navigation");
        }
        self.bus.emit_host(
            HostEvent::NavigationChanged,
            &json!({ "path": path, "previousPath": previous_path, "app": app }),
        );
    }

    fn clear_active_app(&self) {
        let patch = json!({ "activeApp": null, "updatedAt": Utc::now() });
        if let Err(e) = self.state.update(StateSlice::Navigation, patch) {
            warn!(error = %e, "Failed to clear active application");
        }
    }
}

/// Run a transition that already holds the queue on its own task and wait
/// for it.
async fn run_transition<T, F>(transition: F) -> HostResult<T>
where
    T: Send + 'static,
    F: Future<Output = HostResult<T>> + Send + 'static,
{
    tokio::spawn(transition)
        .await
        .map_err(|e| HostError::Handler(format!("transition task failed: {}", e)))?
}

/// Await a lifecycle hook, turning a panic into an error.
async fn run_hook<F>(hook: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("hook panicked: {}", panic_message(payload.as_ref()))),
    }
}
