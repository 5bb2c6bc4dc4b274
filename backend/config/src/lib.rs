//! `canopy-config` — host configuration.
//!
//! Provides:
//! - Typed schema for remotes, applications, shared scope, messaging, state
//!   and logging
//! - YAML loading from the config directory
//! - `${ENV_VAR}` substitution
//! - Default values
//! - Validation with path-addressed errors and warnings
//! - A file-backed `ConfigService`

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod service;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, load_config_value};
pub use schema::{HostConfig, LoggingConfig, MessagingConfig, StateConfig};
pub use service::FileConfigService;
pub use validation::{validate, ConfigValidationError, ValidationReport};

use std::path::Path;

use anyhow::{Context, Result};

/// Load, substitute env vars, apply defaults and validate.
///
/// Validation problems are returned alongside the config, not as an error.
pub async fn load_and_validate(path: &Path) -> Result<(HostConfig, ValidationReport)> {
    let value = load_config_value(path).await?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    let config: HostConfig = serde_json::from_value(value)
        .with_context(|| format!("Invalid config structure in: {}", path.display()))?;
    let config = apply_all_defaults(config);
    let report = validate(&config);
    Ok((config, report))
}

/// Main entry point for loading a config at runtime. Validation findings are
/// logged through whatever subscriber is installed at call time; callers that
/// configure logging from the config itself use `load_and_validate` and
/// `log_report` instead.
pub async fn load_and_prepare(path: &Path) -> Result<HostConfig> {
    let (config, report) = load_and_validate(path).await?;
    log_report(&report);
    Ok(config)
}

/// Log every validation finding. Returns how many were logged.
pub fn log_report(report: &ValidationReport) -> usize {
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    report.warnings.len() + report.errors.len()
}
