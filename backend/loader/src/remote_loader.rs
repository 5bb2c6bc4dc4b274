//! Remote module loader.
//!
//! A load for `(remote, module)` runs: cache lookup, script injection
//! (deduplicated per URL), one-time container init per scope, `get` the
//! factory, instantiate, cache. Concurrent callers for the same key share one
//! run through `SingleFlight`; a failed run is not cached and the next call
//! retries from scratch.
//!
//! Each remote carries a generation bumped by `unload_remote`; a run started
//! under an older generation returns its module but does not cache it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, info, warn};

use canopy_core::sync::lock;
use canopy_core::{
    EventBus, HostError, HostEvent, HostResult, ModuleKey, ModuleRef, ModuleRegistry,
    RemoteConfig, RemoteContainer, SharedScope, SingleFlight, WeakEventBus,
};

struct LoaderInner {
    registry: Arc<dyn ModuleRegistry>,
    shared: Mutex<SharedScope>,
    remotes: Mutex<HashMap<String, RemoteConfig>>,
    cache: Mutex<HashMap<ModuleKey, ModuleRef>>,
    /// Bumped on `unload_remote`. Guarded by the `cache` lock for writes.
    generations: Mutex<HashMap<String, u64>>,
    modules: SingleFlight<ModuleKey, ModuleRef>,
    scripts: SingleFlight<String, ()>,
    loaded_scripts: Arc<Mutex<HashSet<String>>>,
    inits: SingleFlight<String, ()>,
    initialized: Arc<Mutex<HashSet<String>>>,
    bus: Option<WeakEventBus>,
}

/// Loads and caches remote modules. Cloning yields another handle to the
/// same cache.
#[derive(Clone)]
pub struct RemoteLoader {
    inner: Arc<LoaderInner>,
}

impl RemoteLoader {
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self::build(registry, SharedScope::new(), None)
    }

    /// Loader that reports `remote:loaded` / `remote:load-failed` on `bus`.
    pub fn with_bus(registry: Arc<dyn ModuleRegistry>, bus: &EventBus) -> Self {
        Self::build(registry, SharedScope::new(), Some(bus.downgrade()))
    }

    fn build(
        registry: Arc<dyn ModuleRegistry>,
        shared: SharedScope,
        bus: Option<WeakEventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                registry,
                shared: Mutex::new(shared),
                remotes: Mutex::new(HashMap::new()),
                cache: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                modules: SingleFlight::new(),
                scripts: SingleFlight::new(),
                loaded_scripts: Arc::new(Mutex::new(HashSet::new())),
                inits: SingleFlight::new(),
                initialized: Arc::new(Mutex::new(HashSet::new())),
                bus,
            }),
        }
    }

    /// Replace the scope handed to containers initialized from now on.
    pub fn set_shared_scope(&self, shared: SharedScope) {
        *lock(&self.inner.shared) = shared;
    }

    pub fn shared_scope(&self) -> SharedScope {
        lock(&self.inner.shared).clone()
    }

    /// Register or replace the description of a remote.
    pub fn register_remote(&self, config: RemoteConfig) -> HostResult<()> {
        let mut missing = Vec::new();
        if config.name.trim().is_empty() {
            missing.push("name");
        }
        if config.url.trim().is_empty() {
            missing.push("url");
        }
        if config.scope.trim().is_empty() {
            missing.push("scope");
        }
        if !missing.is_empty() {
            return Err(HostError::Validation(format!(
                "remote '{}' is missing required field(s): {}",
                config.name,
                missing.join(", ")
            )));
        }
        let name = config.name.clone();
        if let Some(previous) = lock(&self.inner.remotes).insert(name.clone(), config) {
            debug!(remote = %name, previous_url = %previous.url, "Remote description replaced");
        } else {
            debug!(remote = %name, "Remote registered");
        }
        Ok(())
    }

    pub fn has_remote(&self, name: &str) -> bool {
        lock(&self.inner.remotes).contains_key(name)
    }

    pub fn remote(&self, name: &str) -> Option<RemoteConfig> {
        lock(&self.inner.remotes).get(name).cloned()
    }

    pub fn remotes(&self) -> Vec<RemoteConfig> {
        let mut remotes: Vec<_> = lock(&self.inner.remotes).values().cloned().collect();
        remotes.sort_by(|a, b| a.name.cmp(&b.name));
        remotes
    }

    /// Load `module` from `remote`, at most once per key.
    ///
    /// Callers arriving while a load is running await the same result. The
    /// load runs on its own task, so dropping the returned future does not
    /// cancel it.
    pub async fn load_remote(&self, remote: &str, module: &str) -> HostResult<ModuleRef> {
        let key = ModuleKey::new(remote, module);
        if let Some(cached) = lock(&self.inner.cache).get(&key) {
            return Ok(cached.clone());
        }
        let inner = self.inner.clone();
        let task_key = key.clone();
        self.inner
            .modules
            .run(key, move || async move { inner.load(task_key).await })
            .await
    }

    /// Warm the cache ahead of navigation. Failures are logged, never
    /// returned.
    pub async fn preload_remote(&self, remote: &str, module: &str) -> bool {
        match self.load_remote(remote, module).await {
            Ok(_) => true,
            Err(e) => {
                warn!(remote = %remote, module = %module, error = %e, "Preload failed");
                false
            }
        }
    }

    pub fn is_loaded(&self, remote: &str, module: &str) -> bool {
        lock(&self.inner.cache).contains_key(&ModuleKey::new(remote, module))
    }

    pub fn is_loading(&self, remote: &str, module: &str) -> bool {
        self.inner.modules.is_in_flight(&ModuleKey::new(remote, module))
    }

    pub fn loaded_modules(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<_> = lock(&self.inner.cache).keys().cloned().collect();
        keys.sort_by(|a, b| (&a.remote, &a.module).cmp(&(&b.remote, &b.module)));
        keys
    }

    /// Drop one cached module. The next load instantiates it again.
    pub fn unload(&self, remote: &str, module: &str) -> bool {
        let removed = lock(&self.inner.cache)
            .remove(&ModuleKey::new(remote, module))
            .is_some();
        if removed {
            debug!(remote = %remote, module = %module, "Module evicted");
        }
        removed
    }

    /// Drop every cached module of `remote` and forget its script and
    /// container init, so the next load fetches a fresh deployment. Loads of
    /// `remote` still running finish for their callers but are not cached.
    pub fn unload_remote(&self, remote: &str) -> usize {
        let evicted = {
            let mut cache = lock(&self.inner.cache);
            *lock(&self.inner.generations)
                .entry(remote.to_string())
                .or_insert(0) += 1;
            let before = cache.len();
            cache.retain(|key, _| key.remote != remote);
            before - cache.len()
        };
        let detached = self.inner.modules.forget_where(|key| key.remote == remote);
        if detached > 0 {
            debug!(remote = %remote, detached, "In-flight loads detached from cache");
        }
        if let Some(config) = self.remote(remote) {
            lock(&self.inner.loaded_scripts).remove(&config.url);
            lock(&self.inner.initialized).remove(&config.scope);
        }
        info!(remote = %remote, evicted, "Remote unloaded");
        evicted
    }
}

impl LoaderInner {
    async fn load(self: Arc<Self>, key: ModuleKey) -> HostResult<ModuleRef> {
        // A run that finished between the caller's cache check and joining
        // the flight already populated the cache.
        if let Some(cached) = lock(&self.cache).get(&key) {
            return Ok(cached.clone());
        }
        let generation = self.generation(&key.remote);
        let result = self.instantiate(&key).await;
        match &result {
            Ok(module) => {
                let current = {
                    let mut cache = lock(&self.cache);
                    let current = self.generation(&key.remote) == generation;
                    if current {
                        cache.insert(key.clone(), module.clone());
                    }
                    current
                };
                if !current {
                    debug!(remote = %key.remote, module = %key.module, "Remote unloaded during load; result not cached");
                    return Ok(module.clone());
                }
                info!(remote = %key.remote, module = %key.module, name = %module.name(), "Remote module loaded");
                self.emit(
                    HostEvent::RemoteLoaded,
                    json!({ "remote": key.remote, "module": key.module }),
                );
            }
            Err(e) => {
                warn!(remote = %key.remote, module = %key.module, error = %e, "Remote module failed to load");
                self.emit(
                    HostEvent::RemoteLoadFailed,
                    json!({ "remote": key.remote, "module": key.module, "error": e.to_string() }),
                );
            }
        }
        result
    }

    fn generation(&self, remote: &str) -> u64 {
        lock(&self.generations).get(remote).copied().unwrap_or(0)
    }

    async fn instantiate(&self, key: &ModuleKey) -> HostResult<ModuleRef> {
        let fail = |message: &dyn std::fmt::Display| {
            HostError::remote_load(&key.remote, &key.module, message)
        };

        let config = lock(&self.remotes)
            .get(&key.remote)
            .cloned()
            .ok_or_else(|| fail(&"remote is not registered"))?;

        self.ensure_script(&config.url).await.map_err(|e| fail(&e))?;

        let container = self
            .registry
            .container(&config.scope)
            .ok_or_else(|| fail(&format!("script did not register container '{}'", config.scope)))?;

        self.ensure_initialized(&config.scope, container.clone())
            .await
            .map_err(|e| fail(&e))?;

        let factory = container.get(&key.module).await.map_err(|e| fail(&e))?;
        factory().map_err(|e| fail(&e))
    }

    async fn ensure_script(&self, url: &str) -> HostResult<()> {
        if lock(&self.loaded_scripts).contains(url) {
            return Ok(());
        }
        let registry = self.registry.clone();
        let loaded = self.loaded_scripts.clone();
        let task_url = url.to_string();
        self.scripts
            .run(url.to_string(), move || async move {
                if lock(&loaded).contains(&task_url) {
                    return Ok(());
                }
                debug!(url = %task_url, "Injecting remote script");
                registry
                    .load_script(&task_url)
                    .await
                    .map_err(|e| HostError::Transport(format!("script {}: {:#}", task_url, e)))?;
                lock(&loaded).insert(task_url);
                Ok(())
            })
            .await
    }

    async fn ensure_initialized(
        &self,
        scope: &str,
        container: Arc<dyn RemoteContainer>,
    ) -> HostResult<()> {
        if lock(&self.initialized).contains(scope) {
            return Ok(());
        }
        let initialized = self.initialized.clone();
        let shared = lock(&self.shared).clone();
        let task_scope = scope.to_string();
        self.inits
            .run(scope.to_string(), move || async move {
                if lock(&initialized).contains(&task_scope) {
                    return Ok(());
                }
                container.init(&shared).await.map_err(|e| {
                    HostError::Handler(format!("container '{}' init: {:#}", task_scope, e))
                })?;
                debug!(scope = %task_scope, shared = shared.len(), "Container initialized");
                lock(&initialized).insert(task_scope);
                Ok(())
            })
            .await
    }

    fn emit(&self, event: HostEvent, data: serde_json::Value) {
        if let Some(bus) = self.bus.as_ref().and_then(WeakEventBus::upgrade) {
            bus.emit_host(event, &data);
        }
    }
}
