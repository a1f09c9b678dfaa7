//! JSON file state store
//!
//! The whole [`Snapshot`] is rewritten on every mutation: written to a
//! temporary sibling file, then renamed over the target.

use crate::error::StoreResult;
use crate::store::{Snapshot, StateStore, Transition};
use async_trait::async_trait;
use ebb_types::{LayerKind, LayerState, Phase, ResourceLayer, Secret, Workload};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// File-backed state store
pub struct FileStateStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl FileStateStore {
    /// Open a store, starting empty when the file does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened state file");

        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: &Snapshot) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn layer(&self, kind: LayerKind) -> StoreResult<Option<ResourceLayer>> {
        Ok(self.snapshot.lock().await.layers.get(&kind).cloned())
    }

    async fn save_layer(&self, layer: &ResourceLayer) -> StoreResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.layers.insert(layer.kind, layer.clone());
        self.persist(&snapshot).await
    }

    async fn transition(
        &self,
        kind: LayerKind,
        name: &str,
        allowed: &[Phase],
        next: LayerState,
    ) -> StoreResult<Transition> {
        let mut snapshot = self.snapshot.lock().await;
        let transition = snapshot.transition(kind, name, allowed, next)?;
        self.persist(&snapshot).await?;
        Ok(transition)
    }

    async fn workload(&self, name: &str) -> StoreResult<Option<Workload>> {
        Ok(self.snapshot.lock().await.workloads.get(name).cloned())
    }

    async fn workloads(&self) -> StoreResult<Vec<Workload>> {
        Ok(self
            .snapshot
            .lock()
            .await
            .workloads
            .values()
            .cloned()
            .collect())
    }

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot
            .workloads
            .insert(workload.name.clone(), workload.clone());
        self.persist(&snapshot).await
    }

    async fn secret(&self, name: &str) -> StoreResult<Option<Secret>> {
        Ok(self.snapshot.lock().await.secrets.get(name).cloned())
    }

    async fn secrets(&self) -> StoreResult<Vec<Secret>> {
        Ok(self
            .snapshot
            .lock()
            .await
            .secrets
            .values()
            .cloned()
            .collect())
    }

    async fn save_secret(&self, secret: &Secret) -> StoreResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.secrets.insert(secret.name.clone(), secret.clone());
        self.persist(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use ebb_types::{ConsumerTarget, VaultRef};

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ebb.json");

        {
            let store = FileStateStore::open(&path).await.unwrap();
            store
                .transition(LayerKind::Data, "main", &[Phase::Absent], LayerState::Deploying)
                .await
                .unwrap();
            store
                .transition(LayerKind::Data, "main", &[Phase::Deploying], LayerState::Active)
                .await
                .unwrap();
            store
                .save_secret(&Secret::new(
                    "auth-client-id",
                    VaultRef::new("auth-client-id", None),
                    vec![ConsumerTarget::new("web", "AUTH_CLIENT_ID")],
                ))
                .await
                .unwrap();
        }

        let store = FileStateStore::open(&path).await.unwrap();
        let data = store.layer(LayerKind::Data).await.unwrap().unwrap();
        assert_eq!(data.phase(), Phase::Active);
        assert_eq!(data.name, "main");
        assert!(store.secret("auth-client-id").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejected_transition_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ebb.json");
        let store = FileStateStore::open(&path).await.unwrap();

        let err = store
            .transition(LayerKind::Compute, "web", &[Phase::Paused], LayerState::Resuming)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransitionRejected { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ebb.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            FileStateStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
