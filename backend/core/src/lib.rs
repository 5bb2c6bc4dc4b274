pub mod error;
pub mod event;
pub mod event_bus;
pub mod message;
pub mod single_flight;
pub mod sync;
pub mod traits;
pub mod types;

pub use error::{HostError, HostResult};
pub use event::{queued_event, request_event, state_updated_event, HostEvent};
pub use event_bus::{EventBus, Handler, Subscription, SubscriptionId, WeakEventBus};
pub use message::{
    response_channel, MessageEnvelope, RequestMessage, ResponseMessage, BROADCAST_TARGET,
    RESPONSE_TYPE,
};
pub use single_flight::SingleFlight;
pub use traits::{
    ConfigService, HostSurface, InboundMessage, MessageTransport, ModuleFactory, ModuleRef,
    ModuleRegistry, RemoteContainer, RemoteModule,
};
pub use types::{
    ApplicationDescriptor, LifecycleState, ModuleKey, MountContext, RemoteConfig,
    SharedDependency, SharedScope, DEFAULT_EXPOSED_MODULE,
};
