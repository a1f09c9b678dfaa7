//! Read-only status report

use chrono::{DateTime, Utc};
use ebb_types::{
    CostBudget, Fingerprint, ImageRef, LayerKind, LayerState, Phase, ResourceId, ResourceLayer,
    RevisionId, RotationId, ScaleConfig, Secret, VaultRef, VerificationResult, Workload,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Current state of one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerStatus {
    pub kind: LayerKind,
    pub name: String,
    pub phase: Phase,
    pub state: LayerState,
    /// When the current state was entered; `None` if never deployed
    pub since: Option<DateTime<Utc>>,
    pub resources: Vec<ResourceId>,
    /// Transient for longer than the configured timeout
    pub stale: bool,
}

impl LayerStatus {
    pub(crate) fn of(
        kind: LayerKind,
        name: &str,
        layer: Option<ResourceLayer>,
        timeout: chrono::Duration,
    ) -> Self {
        match layer {
            Some(layer) => Self {
                kind,
                name: layer.name.clone(),
                phase: layer.phase(),
                stale: layer.is_stale(Utc::now(), timeout),
                since: Some(layer.since),
                resources: layer.resources,
                state: layer.state,
            },
            None => Self {
                kind,
                name: name.to_string(),
                phase: Phase::Absent,
                state: LayerState::Absent,
                since: None,
                resources: Vec::new(),
                stale: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub active_revision: Option<RevisionId>,
    /// Last known-good image
    pub image: ImageRef,
    /// Last known-good scale
    pub scale: ScaleConfig,
    pub revisions: usize,
}

impl From<Workload> for WorkloadStatus {
    fn from(workload: Workload) -> Self {
        Self {
            revisions: workload.revisions.len(),
            name: workload.name,
            active_revision: workload.active_revision,
            image: workload.image,
            scale: workload.scale,
        }
    }
}

/// Latest rotation of a secret and its last verification results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationStatus {
    pub id: RotationId,
    pub vault_ref: VaultRef,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub verified: bool,
    pub consumers: BTreeMap<String, VerificationResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStatus {
    pub name: String,
    pub last_verified: Option<Fingerprint>,
    pub rotations: usize,
    pub latest: Option<RotationStatus>,
    /// A rotation of this secret holds its lock right now
    pub rotating: bool,
}

impl From<Secret> for SecretStatus {
    fn from(secret: Secret) -> Self {
        let latest = secret.latest_rotation().map(|r| RotationStatus {
            id: r.id,
            vault_ref: r.vault_ref.clone(),
            timestamp: r.timestamp,
            fingerprint: r.fingerprint.clone(),
            verified: r.verified,
            consumers: r.verification.clone(),
        });
        Self {
            name: secret.name,
            last_verified: secret.last_verified,
            rotations: secret.history.len(),
            latest,
            rotating: false,
        }
    }
}

/// Everything `status()` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub data: LayerStatus,
    pub compute: LayerStatus,
    pub workloads: Vec<WorkloadStatus>,
    pub secrets: Vec<SecretStatus>,
    /// Projected from the workloads' current scale; `None` if it cannot be priced
    pub budget: Option<CostBudget>,
}

impl StatusReport {
    pub fn layer(&self, kind: LayerKind) -> &LayerStatus {
        match kind {
            LayerKind::Data => &self.data,
            LayerKind::Compute => &self.compute,
        }
    }
}
