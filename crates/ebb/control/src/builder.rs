//! Builder for LifecycleController
//!
//! Wires the configuration and the backends (state store, cloud provider,
//! probes, vault, image builder) into a controller. Every backend is required.

use crate::config::EbbConfig;
use crate::controller::LifecycleController;
use crate::deployer::WorkloadDeployer;
use crate::error::{ControlError, ControlResult};
use crate::events::EventAggregator;
use ebb_cloud::{ArtifactProbe, Builder, CloudControl, HealthProbe, Vault};
use ebb_costs::{CostPolicyEngine, TierCatalog};
use ebb_secrets::{PipelineBackends, SecretPipeline};
use ebb_store::StateStore;
use ebb_validator::DeploymentValidator;
use std::sync::Arc;

/// Builder for constructing a LifecycleController with all dependencies
pub struct LifecycleControllerBuilder {
    config: EbbConfig,
    store: Option<Arc<dyn StateStore>>,
    cloud: Option<Arc<dyn CloudControl>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    artifact_probe: Option<Arc<dyn ArtifactProbe>>,
    vault: Option<Arc<dyn Vault>>,
    builder: Option<Arc<dyn Builder>>,
    events: Option<EventAggregator>,
}

impl LifecycleControllerBuilder {
    pub fn new(config: EbbConfig) -> Self {
        Self {
            config,
            store: None,
            cloud: None,
            health_probe: None,
            artifact_probe: None,
            vault: None,
            builder: None,
            events: None,
        }
    }

    /// Set the durable state store
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cloud provider
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudControl>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Set the probe used for health and connectivity checks
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    /// Set the probe used to fetch served bundles during verification
    pub fn with_artifact_probe(mut self, probe: Arc<dyn ArtifactProbe>) -> Self {
        self.artifact_probe = Some(probe);
        self
    }

    pub fn with_vault(mut self, vault: Arc<dyn Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn Builder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Share an existing event stream instead of creating a new one
    pub fn with_events(mut self, events: EventAggregator) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and build the controller
    pub fn build(self) -> ControlResult<LifecycleController> {
        self.config.validate()?;

        let store = self.store.ok_or(ControlError::MissingBackend("store"))?;
        let cloud = self.cloud.ok_or(ControlError::MissingBackend("cloud"))?;
        let health = self
            .health_probe
            .ok_or(ControlError::MissingBackend("health_probe"))?;
        let artifacts = self
            .artifact_probe
            .ok_or(ControlError::MissingBackend("artifact_probe"))?;
        let vault = self.vault.ok_or(ControlError::MissingBackend("vault"))?;
        let builder = self.builder.ok_or(ControlError::MissingBackend("builder"))?;

        let config = Arc::new(self.config);
        let costs = CostPolicyEngine::new(
            config.budget.clone(),
            TierCatalog::new(config.tiers.clone())?,
        );
        let validator = Arc::new(DeploymentValidator::new(
            cloud.clone(),
            health,
            config.retry.clone(),
            config.health.window.clone(),
        ));
        let deployer = Arc::new(WorkloadDeployer::new(
            config.clone(),
            cloud.clone(),
            store.clone(),
            validator.clone(),
        ));
        let pipeline = SecretPipeline::new(
            config.secrets.clone(),
            config.workload_sources(),
            PipelineBackends {
                store: store.clone(),
                vault,
                builder,
                deployer: deployer.clone(),
                artifacts,
            },
            config.pipeline_settings(),
        );

        Ok(LifecycleController::new(
            config,
            store,
            cloud,
            validator,
            deployer,
            pipeline,
            costs,
            self.events.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_cloud::{ArtifactRegistry, LocalBuilder, MemoryVault, SimulatedCloud};
    use ebb_store::InMemoryStateStore;

    #[test]
    fn test_missing_backend() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let result = LifecycleControllerBuilder::new(EbbConfig::default())
            .with_store(Arc::new(InMemoryStateStore::new()))
            .with_cloud(cloud.clone())
            .with_health_probe(cloud)
            .build();
        assert!(matches!(
            result,
            Err(ControlError::MissingBackend("artifact_probe"))
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let registry = ArtifactRegistry::new();
        let cloud = Arc::new(SimulatedCloud::new(registry.clone()));
        let mut config = EbbConfig::default();
        config.tiers.clear();

        let result = LifecycleControllerBuilder::new(config)
            .with_store(Arc::new(InMemoryStateStore::new()))
            .with_cloud(cloud.clone())
            .with_health_probe(cloud.clone())
            .with_artifact_probe(cloud)
            .with_vault(Arc::new(MemoryVault::new()))
            .with_builder(Arc::new(LocalBuilder::new("registry.local", registry)))
            .build();
        assert!(matches!(result, Err(ControlError::Config(_))));
    }
}
