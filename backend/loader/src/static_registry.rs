//! In-memory module registry.
//!
//! "Loading a script" registers a prebuilt container under its scope, the way
//! a remote entry script assigns its container to a global. Used by the CLI
//! simulator and tests; latency and failures can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::debug;

use canopy_core::sync::lock;
use canopy_core::{ModuleFactory, ModuleRef, ModuleRegistry, RemoteContainer, SharedScope};

/// Builds a fresh module instance each time a factory is invoked.
pub type ModuleConstructor = Arc<dyn Fn() -> Result<ModuleRef> + Send + Sync>;

pub struct StaticContainer {
    scope: String,
    modules: Mutex<HashMap<String, ModuleConstructor>>,
    initialized: AtomicBool,
    init_calls: AtomicUsize,
    shared: Mutex<Option<SharedScope>>,
}

impl StaticContainer {
    pub fn new(scope: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            scope: scope.into(),
            modules: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            shared: Mutex::new(None),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Expose `module` (e.g. `./App`) backed by `constructor`.
    pub fn expose<F>(&self, module: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<ModuleRef> + Send + Sync + 'static,
    {
        lock(&self.modules).insert(module.into(), Arc::new(constructor));
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// How many times `init` was called, including no-op repeats.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// The scope negotiated by the first `init`.
    pub fn shared_scope(&self) -> Option<SharedScope> {
        lock(&self.shared).clone()
    }
}

#[async_trait]
impl RemoteContainer for StaticContainer {
    async fn init(&self, shared: &SharedScope) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!(scope = %self.scope, "Container already initialized");
            return Ok(());
        }
        *lock(&self.shared) = Some(shared.clone());
        Ok(())
    }

    async fn get(&self, module: &str) -> Result<ModuleFactory> {
        if !self.is_initialized() {
            bail!("container '{}' used before init", self.scope);
        }
        let constructor = lock(&self.modules)
            .get(module)
            .cloned()
            .ok_or_else(|| anyhow!("module '{}' is not exposed by '{}'", module, self.scope))?;
        Ok(Box::new(move || constructor()))
    }
}

#[derive(Default)]
pub struct StaticModuleRegistry {
    scripts: Mutex<HashMap<String, Arc<StaticContainer>>>,
    containers: Mutex<HashMap<String, Arc<StaticContainer>>>,
    script_loads: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    latency: Duration,
}

impl StaticModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every script load by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Serve `container` from the script at `url`.
    pub fn register_script(&self, url: impl Into<String>, container: Arc<StaticContainer>) {
        lock(&self.scripts).insert(url.into(), container);
    }

    /// Make the next `count` loads of `url` fail.
    pub fn fail_next(&self, url: impl Into<String>, count: usize) {
        lock(&self.failures).insert(url.into(), count);
    }

    /// Number of load attempts for `url`, failed ones included.
    pub fn script_loads(&self, url: &str) -> usize {
        lock(&self.script_loads).get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleRegistry for StaticModuleRegistry {
    async fn load_script(&self, url: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        *lock(&self.script_loads).entry(url.to_string()).or_default() += 1;

        {
            let mut failures = lock(&self.failures);
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!("network error loading {}", url);
                }
            }
        }

        let container = lock(&self.scripts)
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no script served at {}", url))?;
        debug!(url = %url, scope = %container.scope(), "Script evaluated");
        lock(&self.containers).insert(container.scope().to_string(), container);
        Ok(())
    }

    fn container(&self, scope: &str) -> Option<Arc<dyn RemoteContainer>> {
        lock(&self.containers)
            .get(scope)
            .cloned()
            .map(|c| c as Arc<dyn RemoteContainer>)
    }
}
