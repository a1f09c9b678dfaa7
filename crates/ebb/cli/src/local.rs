//! Local backends
//!
//! The CLI drives a simulated provider whose state is persisted next to the
//! state file (`<state>.cloud.json`), so successive invocations see the same
//! resources, revisions and published bundles. Secrets come from a TOML vault
//! file.

use crate::error::{CliError, CliResult};
use ebb_cloud::{ArtifactRegistry, FileVault, LocalBuilder, SimulatedCloud, SimulatedCloudState};
use ebb_control::{EbbConfig, LifecycleController, LifecycleControllerBuilder};
use ebb_store::FileStateStore;
use ebb_types::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const IMAGE_REPOSITORY: &str = "registry.local";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudFile {
    #[serde(default)]
    provider: SimulatedCloudState,
    #[serde(default)]
    bundles: HashMap<ImageRef, String>,
}

pub struct LocalBackends {
    cloud_path: PathBuf,
    cloud: Arc<SimulatedCloud>,
    builder: Arc<LocalBuilder>,
    store: Arc<FileStateStore>,
    vault: Arc<FileVault>,
}

impl LocalBackends {
    /// Default vault file: `vault.toml` beside the state file
    pub fn default_vault_path(state: &Path) -> PathBuf {
        state.with_file_name("vault.toml")
    }

    pub fn cloud_path(state: &Path) -> PathBuf {
        state.with_extension("cloud.json")
    }

    pub async fn open(state: &Path, vault: &Path) -> CliResult<Self> {
        let cloud_path = Self::cloud_path(state);
        let file = match tokio::fs::read_to_string(&cloud_path).await {
            Ok(content) => serde_json::from_str::<CloudFile>(&content).map_err(|e| {
                CliError::LocalState(format!("{}: {}", cloud_path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CloudFile::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %cloud_path.display(), "Loaded simulated provider");

        let registry = ArtifactRegistry::from_bundles(file.bundles);
        Ok(Self {
            cloud_path,
            cloud: Arc::new(SimulatedCloud::from_state(file.provider, registry.clone())),
            builder: Arc::new(LocalBuilder::new(IMAGE_REPOSITORY, registry)),
            store: Arc::new(FileStateStore::open(state).await?),
            vault: Arc::new(FileVault::new(vault)),
        })
    }

    pub fn controller(&self, config: EbbConfig) -> CliResult<LifecycleController> {
        Ok(LifecycleControllerBuilder::new(config)
            .with_store(self.store.clone())
            .with_cloud(self.cloud.clone())
            .with_health_probe(self.cloud.clone())
            .with_artifact_probe(self.cloud.clone())
            .with_vault(self.vault.clone())
            .with_builder(self.builder.clone())
            .build()?)
    }

    /// Write the provider state back to disk
    pub async fn persist(&self) -> CliResult<()> {
        let file = CloudFile {
            provider: self.cloud.snapshot(),
            bundles: self.cloud.registry().bundles(),
        };
        if let Some(parent) = self.cloud_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.cloud_path, serde_json::to_string_pretty(&file)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_sit_beside_state() {
        let state = Path::new("/tmp/ebb/state.json");
        assert_eq!(
            LocalBackends::cloud_path(state),
            PathBuf::from("/tmp/ebb/state.cloud.json")
        );
        assert_eq!(
            LocalBackends::default_vault_path(state),
            PathBuf::from("/tmp/ebb/vault.toml")
        );
    }
}
