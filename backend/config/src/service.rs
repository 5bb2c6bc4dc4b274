use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use canopy_core::{ConfigService, RemoteConfig};

use crate::load_and_prepare;

/// `ConfigService` backed by a `canopy.yaml` file. The file is re-read on
/// every call, so edits are picked up by the next seeding.
#[derive(Debug, Clone)]
pub struct FileConfigService {
    path: PathBuf,
}

impl FileConfigService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ConfigService for FileConfigService {
    async fn remotes(&self) -> Result<Vec<RemoteConfig>> {
        Ok(load_and_prepare(&self.path).await?.remotes)
    }
}
