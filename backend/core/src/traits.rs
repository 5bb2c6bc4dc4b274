use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::HostResult;
use crate::types::{MountContext, RemoteConfig, SharedScope};

/// Shared handle to an instantiated module.
pub type ModuleRef = Arc<dyn RemoteModule>;

/// Factory returned by a container; calling it instantiates the module.
pub type ModuleFactory = Box<dyn FnOnce() -> Result<ModuleRef> + Send>;

/// An instantiated, mountable unit of code exposed by a remote application.
///
/// Errors returned from the hooks are converted into `HostError` by the
/// orchestrator; they never abort the host.
#[async_trait]
pub trait RemoteModule: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// One-time initialisation. Runs at most once per application lifetime.
    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }

    /// Attach rendered output to the container named in `ctx`.
    async fn mount(&self, ctx: &MountContext) -> Result<()>;

    /// Detach rendered output from the container named in `ctx`.
    async fn unmount(&self, ctx: &MountContext) -> Result<()>;
}

/// Runtime object through which a remote exposes modules and negotiates
/// shared dependencies.
#[async_trait]
pub trait RemoteContainer: Send + Sync {
    /// Negotiate the shared scope. Must be idempotent.
    async fn init(&self, shared: &SharedScope) -> Result<()>;

    /// Resolve the factory of an exposed module.
    async fn get(&self, module: &str) -> Result<ModuleFactory>;
}

/// Capability that makes remote code available to the loader.
///
/// Stands in for global script injection: a browser host injects a script tag,
/// other hosts resolve containers however they like.
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    /// Fetch and evaluate the remote entry at `url`.
    async fn load_script(&self, url: &str) -> Result<()>;

    /// Container registered under `scope` once its script has loaded.
    fn container(&self, scope: &str) -> Option<Arc<dyn RemoteContainer>>;
}

/// The host page: containers exist before applications mount into them.
pub trait HostSurface: Send + Sync {
    fn has_container(&self, selector: &str) -> bool;
}

/// A raw message received from another browsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Origin of the sending context, as reported by the channel.
    pub origin: String,
    /// Serialized JSON envelope.
    pub data: String,
}

/// Cross-context messaging channel owned by a `PostMessageBridge`.
pub trait MessageTransport: Send + Sync {
    /// Origin of this side of the channel.
    fn origin(&self) -> &str;

    /// Deliver `message` to the peer if its origin matches `target_origin`
    /// (`"*"` matches any origin).
    fn post(&self, message: String, target_origin: &str) -> HostResult<()>;

    /// Take the inbound stream (can only be called once).
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;
}

/// External collaborator supplying remote descriptions at startup.
#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn remotes(&self) -> Result<Vec<RemoteConfig>>;
}
