//! State store trait and the snapshot shared by implementations

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use ebb_types::{LayerKind, LayerState, Phase, ResourceLayer, Secret, Workload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a successful layer transition
#[derive(Debug, Clone)]
pub struct Transition {
    /// Phase before the transition
    pub from: Phase,

    /// Layer after the transition
    pub layer: ResourceLayer,
}

/// Persistence for Ebb entities
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a layer; `None` means it was never deployed (Absent)
    async fn layer(&self, kind: LayerKind) -> StoreResult<Option<ResourceLayer>>;

    /// Overwrite a layer record
    async fn save_layer(&self, layer: &ResourceLayer) -> StoreResult<()>;

    /// Atomically move a layer to `next` if its phase is one of `allowed`
    ///
    /// A missing layer counts as `Absent` and is created (named `name`) only
    /// when the transition is accepted.
    async fn transition(
        &self,
        kind: LayerKind,
        name: &str,
        allowed: &[Phase],
        next: LayerState,
    ) -> StoreResult<Transition>;

    async fn workload(&self, name: &str) -> StoreResult<Option<Workload>>;

    /// All workloads, sorted by name
    async fn workloads(&self) -> StoreResult<Vec<Workload>>;

    async fn save_workload(&self, workload: &Workload) -> StoreResult<()>;

    async fn secret(&self, name: &str) -> StoreResult<Option<Secret>>;

    /// All secrets, sorted by name
    async fn secrets(&self) -> StoreResult<Vec<Secret>>;

    async fn save_secret(&self, secret: &Secret) -> StoreResult<()>;
}

/// Full persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub layers: BTreeMap<LayerKind, ResourceLayer>,

    #[serde(default)]
    pub workloads: BTreeMap<String, Workload>,

    #[serde(default)]
    pub secrets: BTreeMap<String, Secret>,
}

impl Snapshot {
    pub(crate) fn transition(
        &mut self,
        kind: LayerKind,
        name: &str,
        allowed: &[Phase],
        next: LayerState,
    ) -> StoreResult<Transition> {
        let from = self
            .layers
            .get(&kind)
            .map(ResourceLayer::phase)
            .unwrap_or(Phase::Absent);
        check_allowed(kind, from, allowed)?;

        let layer = self
            .layers
            .entry(kind)
            .or_insert_with(|| ResourceLayer::new(kind, name));
        layer.name = name.to_string();
        layer.set_state(next);
        Ok(Transition {
            from,
            layer: layer.clone(),
        })
    }
}

pub(crate) fn check_allowed(kind: LayerKind, current: Phase, allowed: &[Phase]) -> StoreResult<()> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(StoreError::TransitionRejected {
            kind,
            current,
            allowed: allowed.to_vec(),
        })
    }
}
