//! Route patterns.
//!
//! A pattern is a `/`-separated list of segments: a literal, a `:param`, or a
//! trailing `*`. Matching is by prefix: `/shop` owns `/shop/cart/42`. When
//! several patterns match, the one with more non-wildcard segments wins, then
//! the one with more literal segments, then the one registered first.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use canopy_core::{HostError, HostResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> HostResult<Self> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('/') {
            return Err(HostError::Validation(format!(
                "route '{}' must start with '/'",
                raw
            )));
        }
        let parts: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(HostError::Validation(format!(
                        "route '{}': '*' is only allowed as the last segment",
                        raw
                    )));
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(HostError::Validation(format!(
                        "route '{}': empty parameter name",
                        raw
                    )));
                }
                Segment::Param(name.to_string())
            } else if part.contains('*') || part.contains(':') {
                return Err(HostError::Validation(format!(
                    "route '{}': invalid segment '{}'",
                    raw, part
                )));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: format!("/{}", parts.join("/")),
            segments,
        })
    }

    /// Normalized pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Conflict key: patterns with the same shape match exactly the same
    /// paths. Param names are erased, and a trailing `*` is dropped because
    /// matching is already by prefix (`/a/*` owns what `/a` owns).
    pub fn shape(&self) -> String {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(l) => Some(l.as_str()),
                Segment::Param(_) => Some(":"),
                Segment::Wildcard => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    /// `(non-wildcard segments, literal segments)`; larger is more specific.
    pub fn specificity(&self) -> (usize, usize) {
        let fixed = self
            .segments
            .iter()
            .filter(|s| !matches!(s, Segment::Wildcard))
            .count();
        let literal = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (fixed, literal)
    }

    /// Captured parameters if `path` starts with this pattern.
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = BTreeMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert("*".to_string(), parts[i.min(parts.len())..].join("/"));
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub app: String,
    pub pattern: String,
    pub params: BTreeMap<String, String>,
}
