//! Application registry, route matching and lifecycle orchestration.

pub mod orchestrator;
pub mod registry;
pub mod route;
pub mod surface;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::{ApplicationInfo, Registry};
pub use route::{RouteMatch, RoutePattern};
pub use surface::HeadlessSurface;
