//! Seam through which the pipeline rolls out rebuilt images
//!
//! Rolling out a revision (create, health probe, route traffic) belongs to the
//! lifecycle controller; the pipeline only asks for it.

use async_trait::async_trait;
use ebb_types::{ImageRef, ResourceId, RevisionId};
use thiserror::Error;

/// A revision that now receives traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedRevision {
    pub workload: String,
    pub revision: RevisionId,
    /// Revision that served before; kept until explicitly retired
    pub previous: Option<RevisionId>,
    /// Public address of the workload
    pub service_url: String,
    /// Cloud resources backing the workload
    pub resources: Vec<ResourceId>,
}

/// A rollout failed; `check` names the failing step
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{check}: {reason}")]
pub struct DeployFailure {
    pub check: String,
    pub reason: String,
}

impl DeployFailure {
    pub fn new(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait RevisionDeployer: Send + Sync {
    /// Deploy `image` as a new revision and route traffic to it once healthy
    async fn deploy_revision(
        &self,
        workload: &str,
        image: ImageRef,
    ) -> Result<DeployedRevision, DeployFailure>;

    /// Remove a revision that no longer receives traffic
    async fn retire_revision(&self, workload: &str, revision: &RevisionId)
        -> Result<(), DeployFailure>;
}
