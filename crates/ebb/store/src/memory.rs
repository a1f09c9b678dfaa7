//! In-memory state store

use crate::error::StoreResult;
use crate::store::{check_allowed, StateStore, Transition};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ebb_types::{LayerKind, LayerState, Phase, ResourceLayer, Secret, Workload};

/// In-memory implementation for tests and embedding
pub struct InMemoryStateStore {
    layers: DashMap<LayerKind, ResourceLayer>,
    workloads: DashMap<String, Workload>,
    secrets: DashMap<String, Secret>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            layers: DashMap::new(),
            workloads: DashMap::new(),
            secrets: DashMap::new(),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn layer(&self, kind: LayerKind) -> StoreResult<Option<ResourceLayer>> {
        Ok(self.layers.get(&kind).map(|l| l.clone()))
    }

    async fn save_layer(&self, layer: &ResourceLayer) -> StoreResult<()> {
        self.layers.insert(layer.kind, layer.clone());
        Ok(())
    }

    async fn transition(
        &self,
        kind: LayerKind,
        name: &str,
        allowed: &[Phase],
        next: LayerState,
    ) -> StoreResult<Transition> {
        // The entry guard holds the shard lock, making check-and-set atomic.
        match self.layers.entry(kind) {
            Entry::Occupied(mut entry) => {
                let from = entry.get().phase();
                check_allowed(kind, from, allowed)?;
                let layer = entry.get_mut();
                layer.name = name.to_string();
                layer.set_state(next);
                Ok(Transition {
                    from,
                    layer: layer.clone(),
                })
            }
            Entry::Vacant(entry) => {
                check_allowed(kind, Phase::Absent, allowed)?;
                let mut layer = ResourceLayer::new(kind, name);
                layer.set_state(next);
                entry.insert(layer.clone());
                Ok(Transition {
                    from: Phase::Absent,
                    layer,
                })
            }
        }
    }

    async fn workload(&self, name: &str) -> StoreResult<Option<Workload>> {
        Ok(self.workloads.get(name).map(|w| w.clone()))
    }

    async fn workloads(&self) -> StoreResult<Vec<Workload>> {
        let mut workloads: Vec<Workload> = self.workloads.iter().map(|w| w.clone()).collect();
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workloads)
    }

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()> {
        self.workloads
            .insert(workload.name.clone(), workload.clone());
        Ok(())
    }

    async fn secret(&self, name: &str) -> StoreResult<Option<Secret>> {
        Ok(self.secrets.get(name).map(|s| s.clone()))
    }

    async fn secrets(&self) -> StoreResult<Vec<Secret>> {
        let mut secrets: Vec<Secret> = self.secrets.iter().map(|s| s.clone()).collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(secrets)
    }

    async fn save_secret(&self, secret: &Secret) -> StoreResult<()> {
        self.secrets.insert(secret.name.clone(), secret.clone());
        Ok(())
    }
}
