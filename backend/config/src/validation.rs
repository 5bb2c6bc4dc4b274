//! Config validation. Collects every problem in one pass.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::schema::HostConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &HostConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_remotes(config, &mut report);
    validate_applications(config, &mut report);
    validate_shared(config, &mut report);
    validate_messaging(config, &mut report);
    validate_state(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_remotes(config: &HostConfig, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for (i, remote) in config.remotes.iter().enumerate() {
        let path = format!("remotes[{i}]");
        if remote.name.trim().is_empty() {
            report.error(format!("{path}.name"), "Remote name cannot be empty");
        } else if !seen.insert(remote.name.as_str()) {
            report.error(format!("{path}.name"), format!("Duplicate remote '{}'", remote.name));
        }
        if remote.url.trim().is_empty() {
            report.error(format!("{path}.url"), "Remote url cannot be empty");
        } else if !looks_like_url(&remote.url) {
            report.warn(
                format!("{path}.url"),
                format!("'{}' is neither absolute nor root-relative", remote.url),
            );
        }
    }
}

fn validate_applications(config: &HostConfig, report: &mut ValidationReport) {
    let mut names = HashSet::new();
    let mut owners: HashMap<String, &str> = HashMap::new();
    for (i, app) in config.applications.iter().enumerate() {
        let path = format!("applications[{i}]");
        if app.name.trim().is_empty() {
            report.error(format!("{path}.name"), "Application name cannot be empty");
        } else if !names.insert(app.name.as_str()) {
            report.error(
                format!("{path}.name"),
                format!("Duplicate application '{}'", app.name),
            );
        }
        if app.entry.trim().is_empty() {
            report.error(format!("{path}.entry"), "Application entry cannot be empty");
        }
        if app.container.trim().is_empty() {
            report.error(format!("{path}.container"), "Application container cannot be empty");
        }
        if app.routes.is_empty() {
            report.error(format!("{path}.routes"), "Application needs at least one route");
        }
        for (j, route) in app.routes.iter().enumerate() {
            let route_path = format!("{path}.routes[{j}]");
            if !route.starts_with('/') {
                report.error(&route_path, format!("Route '{route}' must start with '/'"));
                continue;
            }
            let normalized = normalize_route(route);
            match owners.get(&normalized) {
                Some(owner) if *owner != app.name => report.error(
                    &route_path,
                    format!("Route '{route}' is already owned by '{owner}'"),
                ),
                _ => {
                    owners.insert(normalized, app.name.as_str());
                }
            }
        }
        if app.exposed.is_empty() {
            report.warn(
                format!("{path}.exposed"),
                "No exposed modules; './App' will be requested",
            );
        }
    }
}

fn validate_shared(config: &HostConfig, report: &mut ValidationReport) {
    for (name, dep) in &config.shared {
        if dep.version.trim().is_empty() {
            report.error(format!("shared.{name}.version"), "Shared dependency needs a version");
        }
    }
}

fn validate_messaging(config: &HostConfig, report: &mut ValidationReport) {
    let Some(messaging) = &config.messaging else { return };
    if messaging.allowed_origins.is_empty() {
        report.warn(
            "messaging.allowedOrigins",
            "No allowed origins; every cross-origin message will be dropped",
        );
    }
    for (i, origin) in messaging.allowed_origins.iter().enumerate() {
        if origin == "*" {
            report.warn(
                format!("messaging.allowedOrigins[{i}]"),
                "Wildcard origin accepts messages from any site",
            );
        } else if !looks_like_url(origin) || origin.starts_with('/') {
            report.error(
                format!("messaging.allowedOrigins[{i}]"),
                format!("'{origin}' is not an origin"),
            );
        }
    }
    if messaging.request_timeout_ms == Some(0) {
        report.error("messaging.requestTimeoutMs", "Request timeout must be positive");
    }
    if matches!(&messaging.self_id, Some(id) if id.trim().is_empty()) {
        report.error("messaging.selfId", "selfId cannot be empty");
    }
}

fn validate_state(config: &HostConfig, report: &mut ValidationReport) {
    if config.state.as_ref().and_then(|s| s.max_update_depth) == Some(0) {
        report.error("state.maxUpdateDepth", "maxUpdateDepth must be at least 1");
    }
}

fn validate_logging(config: &HostConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else {
        return;
    };
    if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.error(
            "logging.level",
            format!("Unknown level '{level}'; expected one of {}", LOG_LEVELS.join(", ")),
        );
    }
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://") || s.starts_with('/')
}

/// Conflict key of a route: param names collapse to `:` and a trailing `*`
/// is dropped, since routes already match by prefix.
fn normalize_route(route: &str) -> String {
    let mut parts: Vec<&str> = route
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| if s.starts_with(':') { ":" } else { s })
        .collect();
    if parts.last() == Some(&"*") {
        parts.pop();
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LoggingConfig, MessagingConfig, StateConfig};
    use canopy_core::{ApplicationDescriptor, RemoteConfig};

    fn app(name: &str, route: &str) -> ApplicationDescriptor {
        ApplicationDescriptor::new(name, "https://cdn.example/app.js", "#main")
            .with_route(route)
            .expose("./App", "./src/App")
    }

    #[test]
    fn test_valid_config_passes() {
        let mut config = HostConfig::default();
        config.remotes.push(RemoteConfig::new(
            "shop",
            "https://cdn.example/shop.js",
            "shop",
            "./App",
        ));
        config.applications.push(app("shop", "/shop"));
        config.messaging = Some(MessagingConfig {
            allowed_origins: vec!["https://shop.example".into()],
            ..Default::default()
        });
        let report = validate(&config);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_duplicate_names_and_routes() {
        let mut config = HostConfig::default();
        config.applications.push(app("shop", "/shop"));
        config.applications.push(app("shop", "/store"));
        config.applications.push(app("catalog", "/shop/"));
        let report = validate(&config);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"applications[1].name"));
        assert!(paths.contains(&"applications[2].routes[0]"));
    }

    #[test]
    fn test_trailing_wildcard_and_param_names_conflict() {
        let mut config = HostConfig::default();
        config.applications.push(app("shell", "/"));
        config.applications.push(app("fallback", "/*"));
        config.applications.push(app("orders", "/orders/:id"));
        config.applications.push(app("invoices", "/orders/:invoice/*"));
        let report = validate(&config);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"applications[1].routes[0]"), "{paths:?}");
        assert!(paths.contains(&"applications[3].routes[0]"), "{paths:?}");
    }

    #[test]
    fn test_missing_fields_and_bad_routes() {
        let mut config = HostConfig::default();
        config
            .applications
            .push(ApplicationDescriptor::new("bare", "", "").with_route("bare"));
        config.remotes.push(RemoteConfig::new("", "", "", ""));
        let report = validate(&config);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        for expected in [
            "applications[0].entry",
            "applications[0].container",
            "applications[0].routes[0]",
            "remotes[0].name",
            "remotes[0].url",
        ] {
            assert!(paths.contains(&expected), "missing {expected} in {paths:?}");
        }
    }

    #[test]
    fn test_messaging_state_and_logging_checks() {
        let mut config = HostConfig::default();
        config.messaging = Some(MessagingConfig {
            allowed_origins: vec!["*".into(), "shop.example".into()],
            request_timeout_ms: Some(0),
            ..Default::default()
        });
        config.state = Some(StateConfig {
            max_update_depth: Some(0),
        });
        config.logging = Some(LoggingConfig {
            level: Some("loud".into()),
            ..Default::default()
        });
        let report = validate(&config);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"messaging.allowedOrigins[1]"));
        assert!(paths.contains(&"messaging.requestTimeoutMs"));
        assert!(paths.contains(&"state.maxUpdateDepth"));
        assert!(paths.contains(&"logging.level"));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].path, "messaging.allowedOrigins[0]");
    }
}
