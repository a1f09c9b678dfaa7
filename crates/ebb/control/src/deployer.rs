//! Revision rollout shared by compute deploys and secret rotations
//!
//! A rollout creates the revision without traffic, probes its own address,
//! and only then routes traffic to it. A revision that fails its probe never
//! serves; whatever served before keeps serving.

use crate::config::EbbConfig;
use async_trait::async_trait;
use ebb_cloud::{retry, ApplyRequest, CloudControl, ResourceSet, RetryPolicy};
use ebb_secrets::{DeployFailure, DeployedRevision, RevisionDeployer};
use ebb_store::StateStore;
use ebb_types::{ImageRef, Revision, RevisionId, RevisionStatus, ScaleConfig, Workload};
use ebb_validator::DeploymentValidator;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Rolls out workload revisions and keeps the workload records current
pub struct WorkloadDeployer {
    config: Arc<EbbConfig>,
    cloud: Arc<dyn CloudControl>,
    store: Arc<dyn StateStore>,
    validator: Arc<DeploymentValidator>,
}

impl WorkloadDeployer {
    pub fn new(
        config: Arc<EbbConfig>,
        cloud: Arc<dyn CloudControl>,
        store: Arc<dyn StateStore>,
        validator: Arc<DeploymentValidator>,
    ) -> Self {
        Self {
            config,
            cloud,
            store,
            validator,
        }
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Create, probe and activate a revision of `workload` running `image` at `scale`
    #[instrument(skip(self, scale), fields(workload = %workload, image = %image))]
    pub async fn deploy(
        &self,
        workload: &str,
        image: ImageRef,
        scale: ScaleConfig,
    ) -> Result<DeployedRevision, DeployFailure> {
        let declared = self
            .config
            .workload(workload)
            .ok_or_else(|| DeployFailure::new("workload", format!("{} is not declared", workload)))?;

        let stored = self.store.workload(workload).await.map_err(store_failure)?;
        let previous = stored.as_ref().and_then(|w| w.active_revision.clone());

        let request = ApplyRequest::WorkloadRevision {
            workload: workload.to_string(),
            image: image.clone(),
            scale: scale.clone(),
        };
        let set = retry(self.retry_policy(), "create_or_update", || {
            self.cloud.create_or_update(&request)
        })
        .await
        .map_err(|e| DeployFailure::new("apply", e.to_string()))?;

        let (revision, service_url) = match (&set.revision, &set.service_url) {
            (Some(revision), Some(url)) => (revision.clone(), url.clone()),
            _ => {
                return Err(DeployFailure::new(
                    "apply",
                    "provider returned no revision or service address",
                ))
            }
        };

        let probe_base = set.revision_url.as_deref().unwrap_or(&service_url);
        let health_url = self.config.health_url(declared, probe_base);
        if let Err(err) = self.validator.probe_health(&health_url).await {
            warn!(revision = %revision, error = %err, "Revision unhealthy, not routing traffic");
            self.discard(workload, &revision).await;
            return Err(DeployFailure::new(err.check(), err.to_string()));
        }

        retry(self.retry_policy(), "activate_revision", || {
            self.cloud.activate_revision(workload, &revision)
        })
        .await
        .map_err(|e| DeployFailure::new("activate", e.to_string()))?;

        let mut record =
            stored.unwrap_or_else(|| Workload::new(workload, image.clone(), scale.clone()));
        record.record_revision(Revision::pending(revision.clone(), image, scale));
        record
            .activate(&revision)
            .map_err(|e| DeployFailure::new("record", e.to_string()))?;
        self.prune_record(&mut record, self.config.lifecycle.revision_history_limit)
            .await;
        self.store
            .save_workload(&record)
            .await
            .map_err(store_failure)?;

        info!(revision = %revision, previous = ?previous, "Revision active");
        Ok(DeployedRevision {
            workload: workload.to_string(),
            revision,
            previous,
            service_url,
            resources: set.resources,
        })
    }

    /// Drop old revisions from `record`, retiring in the cloud any that still exist there
    ///
    /// Returns the removed ids.
    pub async fn prune_record(&self, record: &mut Workload, keep: usize) -> Vec<RevisionId> {
        let live: Vec<RevisionId> = record
            .revisions
            .iter()
            .filter(|r| r.status != RevisionStatus::Retired)
            .map(|r| r.id.clone())
            .collect();

        let removed = record.prune(keep.max(1));
        for id in removed.iter().filter(|id| live.contains(id)) {
            if let Err(err) = retry(self.retry_policy(), "retire_revision", || {
                self.cloud.retire_revision(&record.name, id)
            })
            .await
            {
                warn!(workload = %record.name, revision = %id, error = %err, "Pruned revision not retired");
            }
        }
        removed
    }

    /// Best-effort removal of a revision that never served
    async fn discard(&self, workload: &str, revision: &RevisionId) {
        if let Err(err) = self.cloud.retire_revision(workload, revision).await {
            warn!(workload, revision = %revision, error = %err, "Unhealthy revision left in place");
        }
    }

    /// Delete the cloud resources behind `resources`
    pub async fn delete(&self, resources: &ResourceSet) -> Result<(), DeployFailure> {
        if resources.is_empty() {
            return Ok(());
        }
        retry(self.retry_policy(), "delete", || self.cloud.delete(resources))
            .await
            .map_err(|e| DeployFailure::new("delete", e.to_string()))
    }
}

fn store_failure(error: ebb_store::StoreError) -> DeployFailure {
    DeployFailure::new("state_store", error.to_string())
}

#[async_trait]
impl RevisionDeployer for WorkloadDeployer {
    /// Roll out a rebuilt image at the workload's last known-good scale
    async fn deploy_revision(
        &self,
        workload: &str,
        image: ImageRef,
    ) -> Result<DeployedRevision, DeployFailure> {
        let scale = self
            .store
            .workload(workload)
            .await
            .map_err(store_failure)?
            .map(|w| w.scale)
            .unwrap_or_default();
        self.deploy(workload, image, scale).await
    }

    async fn retire_revision(
        &self,
        workload: &str,
        revision: &RevisionId,
    ) -> Result<(), DeployFailure> {
        retry(self.retry_policy(), "retire_revision", || {
            self.cloud.retire_revision(workload, revision)
        })
        .await
        .map_err(|e| DeployFailure::new("retire", e.to_string()))?;

        if let Some(mut record) = self.store.workload(workload).await.map_err(store_failure)? {
            if record.revision(revision).is_some() {
                record
                    .retire(revision)
                    .map_err(|e| DeployFailure::new("record", e.to_string()))?;
                self.store
                    .save_workload(&record)
                    .await
                    .map_err(store_failure)?;
            }
        }
        info!(workload, revision = %revision, "Revision retired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, WorkloadConfig};
    use ebb_cloud::{ArtifactRegistry, SimulatedCloud};
    use ebb_store::InMemoryStateStore;

    fn deployer(cloud: Arc<SimulatedCloud>, store: Arc<InMemoryStateStore>, keep: usize) -> WorkloadDeployer {
        let mut config = EbbConfig::default();
        config.workloads.push(WorkloadConfig::new("web", "git:main"));
        config.retry = RetryPolicy::immediate(3);
        config.health = HealthConfig {
            path: "/healthz".into(),
            window: RetryPolicy::immediate(2),
        };
        config.lifecycle.revision_history_limit = keep;
        let config = Arc::new(config);

        let validator = Arc::new(DeploymentValidator::new(
            cloud.clone(),
            cloud.clone(),
            config.retry.clone(),
            config.health.window.clone(),
        ));
        WorkloadDeployer::new(config, cloud, store, validator)
    }

    fn image(tag: &str) -> ImageRef {
        ImageRef::from_digest("registry.local/web", tag)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_activates_and_records() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let store = Arc::new(InMemoryStateStore::new());
        let deployer = deployer(cloud.clone(), store.clone(), 10);

        let first = deployer.deploy("web", image("a"), ScaleConfig::default()).await.unwrap();
        assert!(first.previous.is_none());
        let second = deployer.deploy_revision("web", image("b")).await.unwrap();
        assert_eq!(second.previous, Some(first.revision.clone()));
        assert_eq!(cloud.serving_revision("web"), Some(second.revision.clone()));

        let record = store.workload("web").await.unwrap().unwrap();
        assert_eq!(record.active_revision, Some(second.revision));
        assert_eq!(record.image, image("b"));
        assert_eq!(record.rollback_target().unwrap().id, first.revision);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_revision_never_serves() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let store = Arc::new(InMemoryStateStore::new());
        let deployer = deployer(cloud.clone(), store.clone(), 10);

        let first = deployer.deploy("web", image("a"), ScaleConfig::default()).await.unwrap();
        cloud.set_unhealthy("web", true);

        let failure = deployer.deploy_revision("web", image("b")).await.unwrap_err();
        assert_eq!(failure.check, "health_probe");
        assert_eq!(cloud.serving_revision("web"), Some(first.revision.clone()));

        let record = store.workload("web").await.unwrap().unwrap();
        assert_eq!(record.revisions.len(), 1);
        assert_eq!(record.active_revision, Some(first.revision));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failed_deploy_creates_no_record() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        cloud.set_unhealthy("web", true);
        let store = Arc::new(InMemoryStateStore::new());

        let failure = deployer(cloud, store.clone(), 10)
            .deploy("web", image("a"), ScaleConfig::default())
            .await
            .unwrap_err();
        assert_eq!(failure.check, "health_probe");
        assert!(store.workload("web").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let store = Arc::new(InMemoryStateStore::new());
        let deployer = deployer(cloud.clone(), store.clone(), 2);

        let mut deployed = Vec::new();
        for tag in ["a", "b", "c", "d"] {
            deployed.push(deployer.deploy_revision("web", image(tag)).await.unwrap().revision);
        }

        let record = store.workload("web").await.unwrap().unwrap();
        assert_eq!(record.revisions.len(), 2);
        assert_eq!(record.active_revision.as_ref(), deployed.last());

        let live: Vec<_> = cloud
            .list_revisions("web")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(live, deployed[2..].to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeclared_workload() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let store = Arc::new(InMemoryStateStore::new());
        let failure = deployer(cloud.clone(), store, 10)
            .deploy_revision("api", image("a"))
            .await
            .unwrap_err();
        assert_eq!(failure.check, "workload");
        assert_eq!(cloud.mutating_calls(), 0);
    }
}
