//! Host configuration schema (`canopy.yaml`).
//!
//! ```yaml
//! remotes:
//!   - name: shop
//!     url: https://cdn.example.com/shop/remoteEntry.js
//!     scope: shop
//!     module: ./App
//! applications:
//!   - name: shop
//!     entry: https://cdn.example.com/shop/remoteEntry.js
//!     container: "#main"
//!     routes: ["/shop"]
//!     exposed: { "./App": "./src/App" }
//! shared:
//!   react: { version: "18.2.0", singleton: true }
//! messaging:
//!   selfId: host
//!   targetOrigin: https://shop.example.com
//!   allowedOrigins: ["https://shop.example.com"]
//!   requestTimeoutMs: 5000
//! state:
//!   maxUpdateDepth: 16
//! logging:
//!   level: info
//!   dir: /var/log/canopy
//!   json: false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canopy_core::{ApplicationDescriptor, RemoteConfig, SharedScope};
use canopy_messaging::BridgeConfig;

use crate::defaults::{
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_UPDATE_DEPTH, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SELF_ID,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
    #[serde(default)]
    pub applications: Vec<ApplicationDescriptor>,
    #[serde(default)]
    pub shared: SharedScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging: Option<MessagingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingConfig {
    /// Identifier the host answers to on the post-message bridge.
    pub self_id: Option<String>,
    /// Origin outgoing bridge messages are addressed to.
    pub target_origin: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    pub max_update_depth: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub dir: Option<PathBuf>,
    pub json: Option<bool>,
}

impl HostConfig {
    pub fn self_id(&self) -> &str {
        self.messaging
            .as_ref()
            .and_then(|m| m.self_id.as_deref())
            .unwrap_or(DEFAULT_SELF_ID)
    }

    pub fn allowed_origins(&self) -> &[String] {
        self.messaging
            .as_ref()
            .map(|m| m.allowed_origins.as_slice())
            .unwrap_or_default()
    }

    /// Origin outgoing bridge messages are addressed to: the configured one,
    /// else the first concrete allowed origin, else `*`.
    pub fn target_origin(&self) -> &str {
        let messaging = self.messaging.as_ref();
        messaging
            .and_then(|m| m.target_origin.as_deref())
            .or_else(|| {
                messaging.and_then(|m| m.allowed_origins.iter().find(|o| *o != "*").map(String::as_str))
            })
            .unwrap_or(ANY_ORIGIN)
    }

    /// Post-message bridge settings for this host. An allowed origin of `*`
    /// opens the allow-list to every origin.
    pub fn bridge_config(&self) -> BridgeConfig {
        let mut bridge = BridgeConfig::new(self.self_id(), self.target_origin())
            .with_default_timeout(self.request_timeout());
        for origin in self.allowed_origins() {
            if origin == ANY_ORIGIN {
                bridge.allowed_origins.allow_any = true;
            } else {
                bridge.allowed_origins.allow(origin);
            }
        }
        bridge
    }

    pub fn request_timeout(&self) -> Duration {
        let ms = self
            .messaging
            .as_ref()
            .and_then(|m| m.request_timeout_ms)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    pub fn max_update_depth(&self) -> usize {
        self.state
            .as_ref()
            .and_then(|s| s.max_update_depth)
            .unwrap_or(DEFAULT_MAX_UPDATE_DEPTH)
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

const ANY_ORIGIN: &str = "*";
