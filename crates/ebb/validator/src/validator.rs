//! Pre-checks and post-checks against live collaborators

use crate::error::{PostCheckError, ValidationError};
use crate::template::validate_template;
use ebb_cloud::{poll_until, retry, CloudControl, HealthProbe, ProbeStatus, RetryPolicy};
use ebb_types::{LayerTemplate, ResourceId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Runs deployment checks against the cloud and the health probe
pub struct DeploymentValidator {
    cloud: Arc<dyn CloudControl>,
    health: Arc<dyn HealthProbe>,
    /// Retry policy for cloud queries
    retry: RetryPolicy,
    /// Bounded window for health probes
    health_window: RetryPolicy,
}

impl DeploymentValidator {
    pub fn new(
        cloud: Arc<dyn CloudControl>,
        health: Arc<dyn HealthProbe>,
        retry: RetryPolicy,
        health_window: RetryPolicy,
    ) -> Self {
        Self {
            cloud,
            health,
            retry,
            health_window,
        }
    }

    /// Template validity, then a dry-run availability query per globally unique name
    #[instrument(skip(self, template), fields(resources = template.resources.len()))]
    pub async fn pre_check_data(&self, template: &LayerTemplate) -> Result<(), ValidationError> {
        validate_template(template)?;

        for spec in template.globally_unique() {
            let available = retry(&self.retry, "name_available", || {
                self.cloud.name_available(spec.kind, &spec.name)
            })
            .await
            .map_err(ValidationError::Query)?;

            if !available {
                warn!(kind = %spec.kind, name = %spec.name, "Name already taken");
                return Err(ValidationError::NameUnavailable {
                    kind: spec.kind,
                    name: spec.name.clone(),
                });
            }
            debug!(kind = %spec.kind, name = %spec.name, "Name available");
        }

        info!("Pre-checks passed");
        Ok(())
    }

    /// Confirm every resource exists after apply
    #[instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn confirm_resources(&self, resources: &[ResourceId]) -> Result<(), PostCheckError> {
        for id in resources {
            let exists = retry(&self.retry, "resource_exists", || {
                self.cloud.resource_exists(id)
            })
            .await
            .map_err(PostCheckError::Query)?;

            if !exists {
                warn!(resource = %id, "Resource missing after apply");
                return Err(PostCheckError::ResourceMissing(id.clone()));
            }
        }
        Ok(())
    }

    /// Probe `url` until healthy or the window elapses
    #[instrument(skip(self))]
    pub async fn probe_health(&self, url: &str) -> Result<u32, PostCheckError> {
        let health = &self.health;
        let result = poll_until(&self.health_window, "health_probe", |_| async move {
            match health.probe(url).await {
                ProbeStatus::Healthy => Ok(()),
                other => Err(other),
            }
        })
        .await;

        match result {
            Ok(((), attempts)) => {
                info!(attempts, "Health probe passed");
                Ok(attempts)
            }
            Err(err) => {
                let last = err.last.unwrap_or(ProbeStatus::Unreachable {
                    reason: "probe timed out".to_string(),
                });
                warn!(attempts = err.attempts, last = %last, "Health probe window elapsed");
                Err(PostCheckError::Unhealthy {
                    url: url.to_string(),
                    attempts: err.attempts,
                    last,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_cloud::{ApplyRequest, ArtifactRegistry, CloudError, SimulatedCloud};
    use ebb_types::{ResourceKind, ResourceSpec};

    fn validator(cloud: Arc<SimulatedCloud>) -> DeploymentValidator {
        DeploymentValidator::new(
            cloud.clone(),
            cloud,
            RetryPolicy::immediate(3),
            RetryPolicy {
                max_attempts: 4,
                initial_delay_ms: 1_000,
                max_delay_ms: 4_000,
                multiplier: 2.0,
                total_timeout_ms: 30_000,
            },
        )
    }

    fn template() -> LayerTemplate {
        LayerTemplate::new(vec![
            ResourceSpec::new(ResourceKind::Database, "app-db"),
            ResourceSpec::new(ResourceKind::Storage, "ebbassets"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_collision_fails_before_any_mutation() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        cloud.reserve_name(ResourceKind::Storage, "ebbassets");

        let err = validator(cloud.clone())
            .pre_check_data(&template())
            .await
            .unwrap_err();
        assert_eq!(err.check(), "name_uniqueness");
        assert_eq!(cloud.mutating_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_globally_unique_names_are_queried() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        validator(cloud.clone()).pre_check_data(&template()).await.unwrap();

        let queried: Vec<_> = cloud
            .calls()
            .into_iter()
            .filter(|c| c.operation == "name_available")
            .map(|c| c.target)
            .collect();
        assert_eq!(queried, vec!["storage/ebbassets".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_query_failures_are_retried() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        cloud.fail_next("name_available", CloudError::transient("name_available", "429"));

        assert!(validator(cloud).pre_check_data(&template()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resource_reported() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        let err = validator(cloud)
            .confirm_resources(&[ResourceId::new("main/database/app-db")])
            .await
            .unwrap_err();
        assert_eq!(err.check(), "resource_existence");
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_window_is_bounded() {
        let cloud = Arc::new(SimulatedCloud::new(ArtifactRegistry::new()));
        cloud
            .create_or_update(&ApplyRequest::DataLayer {
                layer: "main".into(),
                template: template(),
            })
            .await
            .unwrap();
        cloud.set_unhealthy("data", true);

        let started = tokio::time::Instant::now();
        let err = validator(cloud.clone())
            .probe_health("sim://data/main")
            .await
            .unwrap_err();
        assert!(matches!(err, PostCheckError::Unhealthy { attempts: 4, .. }));
        assert!(started.elapsed() <= std::time::Duration::from_secs(30));

        cloud.set_unhealthy("data", false);
        assert_eq!(validator(cloud).probe_health("sim://data/main").await.unwrap(), 1);
    }
}
