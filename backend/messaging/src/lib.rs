pub mod bridge;
pub mod cross_app;
pub mod origin;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeHandler, BridgeStats, PostMessageBridge};
pub use cross_app::{CrossAppCommunication, DEFAULT_REQUEST_TIMEOUT};
pub use origin::OriginPolicy;
pub use transport::ChannelTransport;
