//! Config file location and loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::schema::HostConfig;

const CONFIG_FILE_NAME: &str = "canopy.yaml";

/// Resolve the config directory.
/// Priority: `CANOPY_CONFIG_DIR` env > `~/.canopy/` > `./.canopy`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CANOPY_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".canopy"),
        None => PathBuf::from(".canopy"),
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read the YAML file as an untyped tree, ready for env substitution.
///
/// A missing file yields an empty mapping (first run).
pub async fn load_config_value(path: &Path) -> Result<Value> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(Value::Object(Default::default()));
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let value: Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    // An empty document parses as null.
    Ok(if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    })
}

/// Read and parse the config as-is, without env substitution or defaults.
pub async fn load_config(path: &Path) -> Result<HostConfig> {
    let value = load_config_value(path).await?;
    serde_json::from_value(value)
        .with_context(|| format!("Invalid config structure in: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.yaml")).await.unwrap();
        assert!(config.applications.is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        fs::write(&path, "").await.unwrap();
        let config = load_config(&path).await.unwrap();
        assert!(config.remotes.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        fs::write(&path, "remotes: [unclosed").await.unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("canopy.yaml"));
    }
}
