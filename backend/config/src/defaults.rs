//! Default values applied to a freshly loaded config.

use crate::schema::{HostConfig, LoggingConfig, MessagingConfig, StateConfig};

pub const DEFAULT_SELF_ID: &str = "host";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_MAX_UPDATE_DEPTH: usize = 16;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Exposed module assumed for applications that expose nothing.
pub const DEFAULT_EXPOSED_PATH: &str = "./App";

pub fn apply_all_defaults(config: HostConfig) -> HostConfig {
    let config = apply_messaging_defaults(config);
    let config = apply_state_defaults(config);
    let config = apply_logging_defaults(config);
    apply_remote_defaults(config)
}

fn apply_messaging_defaults(mut config: HostConfig) -> HostConfig {
    let messaging = config.messaging.get_or_insert_with(MessagingConfig::default);
    if messaging.self_id.is_none() {
        messaging.self_id = Some(DEFAULT_SELF_ID.to_string());
    }
    if messaging.request_timeout_ms.is_none() {
        messaging.request_timeout_ms = Some(DEFAULT_REQUEST_TIMEOUT_MS);
    }
    config
}

fn apply_state_defaults(mut config: HostConfig) -> HostConfig {
    let state = config.state.get_or_insert_with(StateConfig::default);
    if state.max_update_depth.is_none() {
        state.max_update_depth = Some(DEFAULT_MAX_UPDATE_DEPTH);
    }
    config
}

fn apply_logging_defaults(mut config: HostConfig) -> HostConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.json.is_none() {
        logging.json = Some(false);
    }
    config
}

/// Remotes without a scope register under their name; without a module they
/// expose `./App`.
fn apply_remote_defaults(mut config: HostConfig) -> HostConfig {
    for remote in &mut config.remotes {
        if remote.scope.trim().is_empty() {
            remote.scope = remote.name.clone();
        }
        if remote.module.trim().is_empty() {
            remote.module = DEFAULT_EXPOSED_PATH.to_string();
        }
    }
    config
}
