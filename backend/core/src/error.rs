use thiserror::Error;

/// Top-level error type for the Canopy host runtime.
///
/// Every variant carries owned strings so the error is `Clone`; single-flight
/// loads hand the same result to every waiting caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("application '{0}' is already registered")]
    DuplicateName(String),

    #[error("route '{route}' is already owned by '{existing}' (rejected for '{incoming}')")]
    RouteConflict {
        route: String,
        existing: String,
        incoming: String,
    },

    #[error("no application owns route '{0}'")]
    RouteNotFound(String),

    #[error("application '{0}' is not registered")]
    AppNotFound(String),

    #[error("failed to load remote module {remote}/{module}: {message}")]
    RemoteLoad {
        remote: String,
        module: String,
        message: String,
    },

    #[error("request {target}:{action} timed out after {timeout_ms}ms")]
    Timeout {
        target: String,
        action: String,
        timeout_ms: u64,
    },

    #[error("origin '{0}' is not allowed")]
    OriginRejected(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("container '{selector}' for application '{app}' does not exist")]
    ContainerNotFound { app: String, selector: String },

    #[error("mount of '{app}' failed: {message}")]
    Mount { app: String, message: String },

    #[error("state update recursion exceeded depth {0}")]
    StateRecursion(usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0} was destroyed")]
    Destroyed(String),
}

impl HostError {
    /// Wrap a remote-loading failure for the given module key.
    pub fn remote_load(
        remote: impl Into<String>,
        module: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        HostError::RemoteLoad {
            remote: remote.into(),
            module: module.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that leave the operation safely retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HostError::RemoteLoad { .. }
                | HostError::Timeout { .. }
                | HostError::Mount { .. }
                | HostError::Transport(_)
        )
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;
