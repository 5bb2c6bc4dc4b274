//! Origin allow-list for cross-context messages.
//!
//! Every inbound message passes through `is_allowed` before it is parsed.
//! Unlike most policies in the host this one is closed by default.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginPolicy {
    /// Normalized origins (`scheme://host[:port]`).
    allowed: HashSet<String>,
    /// Accept every origin. Only for local development.
    #[serde(default)]
    pub allow_any: bool,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self::default();
        for origin in origins {
            policy.allow(origin.as_ref());
        }
        policy
    }

    /// Add an origin to the allow-list.
    pub fn allow(&mut self, origin: &str) {
        match normalize_origin(origin) {
            Some(normalized) => {
                self.allowed.insert(normalized);
            }
            None => warn!(origin = %origin, "Ignoring unparseable origin in allow-list"),
        }
    }

    /// Returns `true` if messages from `origin` may reach a handler.
    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.allow_any {
            return true;
        }
        normalize_origin(origin)
            .map(|o| self.allowed.contains(&o))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Reduce a URL or origin string to its serialized origin.
///
/// Opaque origins (`null`, `data:` URLs) never normalize and are never allowed.
pub fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}
