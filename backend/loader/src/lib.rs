//! Remote module loading.
//!
//! `RemoteLoader` turns a `(remote, exposed module)` pair into an instantiated
//! module exactly once, sharing in-flight loads between concurrent callers.
//! `StaticModuleRegistry` is the in-memory registry used by headless hosts.

pub mod remote_loader;
pub mod static_registry;

pub use remote_loader::RemoteLoader;
pub use static_registry::{ModuleConstructor, StaticContainer, StaticModuleRegistry};
