//! Workloads and their revision history
//!
//! A workload has at most one `Active` revision at a time. Prior revisions
//! stay retrievable for rollback until explicitly pruned.

use crate::ids::{ImageRef, RevisionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scale configuration for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// Minimum replicas (0 = scale-to-zero)
    pub min_replicas: u32,

    /// Maximum replicas
    pub max_replicas: u32,

    /// CPU in millicores
    pub cpu_millis: u32,

    /// Memory in MiB
    pub memory_mib: u32,

    /// Name of the compute tier the sizing came from
    pub tier: String,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            min_replicas: 0,
            max_replicas: 1,
            cpu_millis: 1000,
            memory_mib: 512,
            tier: "standard".to_string(),
        }
    }
}

/// Lifecycle of a single revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    /// Created but not receiving traffic yet
    Pending,
    /// Receiving traffic
    Active,
    /// Previously active, kept for rollback
    Standby,
    /// Removed from the cloud after a successful replacement
    Retired,
}

/// A versioned, independently activatable deployment of a workload image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub image: ImageRef,
    pub scale: ScaleConfig,
    pub status: RevisionStatus,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    pub fn pending(id: RevisionId, image: ImageRef, scale: ScaleConfig) -> Self {
        Self {
            id,
            image,
            scale,
            status: RevisionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Workload bookkeeping errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("revision {revision} not found on workload {workload}")]
    RevisionNotFound {
        workload: String,
        revision: RevisionId,
    },

    #[error("revision {revision} on workload {workload} is retired")]
    RevisionRetired {
        workload: String,
        revision: RevisionId,
    },

    #[error("revision {revision} on workload {workload} is active")]
    RevisionActive {
        workload: String,
        revision: RevisionId,
    },

    #[error("workload {0} has no revision to roll back to")]
    NoRollbackTarget(String),
}

/// A compute unit: image, scale, and revision history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Workload name, unique within the compute layer
    pub name: String,

    /// Image of the last known-good configuration
    pub image: ImageRef,

    /// Scale of the last known-good configuration
    pub scale: ScaleConfig,

    /// Revision currently receiving traffic
    pub active_revision: Option<RevisionId>,

    /// Revisions, oldest first
    pub revisions: Vec<Revision>,
}

impl Workload {
    pub fn new(name: impl Into<String>, image: ImageRef, scale: ScaleConfig) -> Self {
        Self {
            name: name.into(),
            image,
            scale,
            active_revision: None,
            revisions: Vec::new(),
        }
    }

    pub fn revision(&self, id: &RevisionId) -> Option<&Revision> {
        self.revisions.iter().find(|r| &r.id == id)
    }

    pub fn active(&self) -> Option<&Revision> {
        self.active_revision.as_ref().and_then(|id| self.revision(id))
    }

    /// Record a newly created revision (not yet receiving traffic)
    pub fn record_revision(&mut self, revision: Revision) {
        self.revisions.retain(|r| r.id != revision.id);
        self.revisions.push(revision);
    }

    /// Make `id` the single active revision; the previous one goes to standby
    ///
    /// The activated revision becomes the last known-good configuration.
    pub fn activate(&mut self, id: &RevisionId) -> Result<(), WorkloadError> {
        let target = self.revision(id).ok_or_else(|| WorkloadError::RevisionNotFound {
            workload: self.name.clone(),
            revision: id.clone(),
        })?;
        if target.status == RevisionStatus::Retired {
            return Err(WorkloadError::RevisionRetired {
                workload: self.name.clone(),
                revision: id.clone(),
            });
        }

        for revision in &mut self.revisions {
            if &revision.id == id {
                revision.status = RevisionStatus::Active;
                self.image = revision.image.clone();
                self.scale = revision.scale.clone();
            } else if revision.status == RevisionStatus::Active {
                revision.status = RevisionStatus::Standby;
            }
        }
        self.active_revision = Some(id.clone());
        Ok(())
    }

    /// Mark a revision as retired; the active revision cannot be retired
    pub fn retire(&mut self, id: &RevisionId) -> Result<(), WorkloadError> {
        if self.active_revision.as_ref() == Some(id) {
            return Err(WorkloadError::RevisionActive {
                workload: self.name.clone(),
                revision: id.clone(),
            });
        }
        let revision = self
            .revisions
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| WorkloadError::RevisionNotFound {
                workload: self.name.clone(),
                revision: id.clone(),
            })?;
        revision.status = RevisionStatus::Retired;
        Ok(())
    }

    /// Forget the active revision (compute torn down); history is kept
    pub fn deactivate(&mut self) {
        for revision in &mut self.revisions {
            if revision.status == RevisionStatus::Active {
                revision.status = RevisionStatus::Standby;
            }
        }
        self.active_revision = None;
    }

    /// Most recent revision that could take traffic again, other than the active one
    pub fn rollback_target(&self) -> Option<&Revision> {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.status == RevisionStatus::Standby)
    }

    /// Drop the oldest revisions until at most `keep` remain
    ///
    /// Retired revisions go first, then pending, then standby. The active revision is
    /// never pruned. Returns the ids that were removed.
    pub fn prune(&mut self, keep: usize) -> Vec<RevisionId> {
        let mut removed = Vec::new();
        for status in [
            RevisionStatus::Retired,
            RevisionStatus::Pending,
            RevisionStatus::Standby,
        ] {
            while self.revisions.len() > keep {
                match self.revisions.iter().position(|r| r.status == status) {
                    Some(index) => removed.push(self.revisions.remove(index).id),
                    None => break,
                }
            }
        }
        removed
    }
}
