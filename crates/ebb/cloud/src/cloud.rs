//! Cloud control interface
//!
//! The provider is opaque: Ebb only asks it to create or update a declared
//! resource set, delete resources, and manage workload revisions.

use crate::error::CloudResult;
use async_trait::async_trait;
use ebb_types::{ImageRef, LayerTemplate, ResourceId, ResourceKind, RevisionId, ScaleConfig};
use serde::{Deserialize, Serialize};

/// What to create or update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplyRequest {
    /// Every resource of the data plane template
    DataLayer {
        layer: String,
        template: LayerTemplate,
    },

    /// A new revision of one workload, created without receiving traffic
    WorkloadRevision {
        workload: String,
        image: ImageRef,
        scale: ScaleConfig,
    },
}

impl ApplyRequest {
    /// Short description for logs
    pub fn target(&self) -> String {
        match self {
            ApplyRequest::DataLayer { layer, .. } => format!("layer/{}", layer),
            ApplyRequest::WorkloadRevision { workload, .. } => format!("workload/{}", workload),
        }
    }
}

/// Resources created or updated by one apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    /// Owned cloud resources
    pub resources: Vec<ResourceId>,

    /// Revision created by a workload apply
    pub revision: Option<RevisionId>,

    /// Address of the new revision itself (bypasses traffic routing)
    pub revision_url: Option<String>,

    /// Address of the workload's public service
    pub service_url: Option<String>,
}

impl ResourceSet {
    pub fn of(resources: Vec<ResourceId>) -> Self {
        Self {
            resources,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A revision as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRevision {
    pub id: RevisionId,
    pub image: ImageRef,
    /// Whether the revision currently receives traffic
    pub serving: bool,
}

/// Mutations and queries against the cloud provider
#[async_trait]
pub trait CloudControl: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Dry-run existence query: can `name` be claimed for a resource of `kind`?
    async fn name_available(&self, kind: ResourceKind, name: &str) -> CloudResult<bool>;

    /// Create or update the requested resources
    async fn create_or_update(&self, request: &ApplyRequest) -> CloudResult<ResourceSet>;

    async fn resource_exists(&self, id: &ResourceId) -> CloudResult<bool>;

    /// Delete resources; already-absent resources are not an error
    async fn delete(&self, resources: &ResourceSet) -> CloudResult<()>;

    async fn list_revisions(&self, workload: &str) -> CloudResult<Vec<CloudRevision>>;

    /// Route all traffic of `workload` to `revision`
    async fn activate_revision(&self, workload: &str, revision: &RevisionId) -> CloudResult<()>;

    /// Remove a revision that no longer receives traffic
    async fn retire_revision(&self, workload: &str, revision: &RevisionId) -> CloudResult<()>;
}
