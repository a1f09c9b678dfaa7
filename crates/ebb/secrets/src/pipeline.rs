//! The rotation pipeline

use crate::deployer::{DeployedRevision, RevisionDeployer};
use crate::error::{SecretsError, SecretsResult};
use crate::fingerprint::fingerprint;
use crate::format::{CompiledFormat, SecretFormat};
use crate::lock::SecretLocks;
use crate::verify::verify_served;
use ebb_cloud::{
    retry, ArtifactProbe, BuildArgs, BuildRequest, Builder, RetryPolicy, SecretValue, Vault,
};
use ebb_store::StateStore;
use ebb_types::{
    ConsumerTarget, Fingerprint, ImageRef, LayerKind, Phase, RevisionId, RotationId, Secret,
    VaultRef, VerificationOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// A workload environment variable fed by a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub workload: String,
    pub env_var: String,
}

/// Declared secret: its format class and consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    pub format: SecretFormat,
    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,
}

impl SecretSpec {
    pub fn consumer_targets(&self) -> Vec<ConsumerTarget> {
        self.consumers
            .iter()
            .map(|c| ConsumerTarget::new(&c.workload, &c.env_var))
            .collect()
    }

    pub fn consumer(&self, workload: &str) -> Option<&ConsumerSpec> {
        self.consumers.iter().find(|c| c.workload == workload)
    }
}

/// Where a workload is built from and where its bundle is served
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSource {
    pub source_ref: String,
    /// Path of the served bundle, relative to the service URL
    pub bundle_path: String,
}

impl WorkloadSource {
    fn artifact_url(&self, service_url: &str) -> String {
        let base = service_url.trim_end_matches('/');
        if self.bundle_path.starts_with('/') {
            format!("{}{}", base, self.bundle_path)
        } else {
            format!("{}/{}", base, self.bundle_path)
        }
    }
}

/// Tunables for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Backoff and budget for verification attempts
    pub verification: RetryPolicy,
    /// Wait before every verification attempt
    pub propagation_delay: Duration,
    /// Wait between successful verification and retiring previous revisions
    pub grace_period: Duration,
    /// Retry policy for vault and build calls
    pub retry: RetryPolicy,
}

/// Collaborators the pipeline drives
pub struct PipelineBackends {
    pub store: Arc<dyn StateStore>,
    pub vault: Arc<dyn Vault>,
    pub builder: Arc<dyn Builder>,
    pub deployer: Arc<dyn RevisionDeployer>,
    pub artifacts: Arc<dyn ArtifactProbe>,
}

/// Per-consumer result of a rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub workload: String,
    pub revision: RevisionId,
    pub previous: Option<RevisionId>,
    pub outcome: VerificationOutcome,
    pub attempts: u32,
    pub retired: bool,
}

/// Result of a verified rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub secret: String,
    pub rotation_id: RotationId,
    pub vault_ref: VaultRef,
    pub fingerprint: Fingerprint,
    pub verified: bool,
    pub consumers: Vec<ConsumerReport>,
}

/// Secret propagation pipeline
pub struct SecretPipeline {
    specs: BTreeMap<String, SecretSpec>,
    sources: BTreeMap<String, WorkloadSource>,
    backends: PipelineBackends,
    settings: PipelineSettings,
    locks: SecretLocks,
}

impl SecretPipeline {
    pub fn new(
        specs: Vec<SecretSpec>,
        sources: BTreeMap<String, WorkloadSource>,
        backends: PipelineBackends,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
            sources,
            backends,
            settings,
            locks: SecretLocks::new(),
        }
    }

    pub fn spec(&self, name: &str) -> Option<&SecretSpec> {
        self.specs.get(name)
    }

    pub fn locks(&self) -> &SecretLocks {
        &self.locks
    }

    /// Rotate `name` to the value referenced by `vault_ref`
    #[instrument(skip(self), fields(secret = %name, vault_ref = %vault_ref))]
    pub async fn rotate(&self, name: &str, vault_ref: &VaultRef) -> SecretsResult<RotationReport> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| SecretsError::UnknownSecret(name.to_string()))?;
        let format = spec.format.compile(name)?;
        for consumer in &spec.consumers {
            self.source(&consumer.workload)?;
        }

        let _guard = self.locks.acquire(name).await;

        let compute = self
            .backends
            .store
            .layer(LayerKind::Compute)
            .await?
            .map(|layer| layer.phase())
            .unwrap_or(Phase::Absent);
        if compute != Phase::Active {
            return Err(SecretsError::ComputeNotActive(compute));
        }

        let resolved = self.resolve(name, vault_ref).await?;
        let value = self.read(name, &resolved).await?;
        format
            .validate(&value)
            .map_err(|reason| SecretsError::InvalidFormat {
                secret: name.to_string(),
                reason,
            })?;
        let new_fingerprint = fingerprint(&value);

        let mut secret = self
            .backends
            .store
            .secret(name)
            .await?
            .unwrap_or_else(|| Secret::new(name, resolved.clone(), spec.consumer_targets()));
        secret.consumers = spec.consumer_targets();

        let rotation_id = RotationId::generate();
        secret.begin_rotation(rotation_id, resolved.clone(), new_fingerprint.clone());
        let previous = secret.previous_fingerprints(&rotation_id);
        self.backends.store.save_secret(&secret).await?;
        info!(rotation = %rotation_id, fingerprint = %new_fingerprint, "Rotation started");

        let mut deployed = Vec::with_capacity(spec.consumers.len());
        for consumer in &spec.consumers {
            let image = self
                .build_for(&consumer.workload, Some((name, &value)))
                .await?;
            let revision = self
                .backends
                .deployer
                .deploy_revision(&consumer.workload, image)
                .await
                .map_err(|failure| SecretsError::Deploy {
                    workload: consumer.workload.clone(),
                    check: failure.check,
                    reason: failure.reason,
                })?;
            secret.record_deployed(&rotation_id, &consumer.workload, revision.revision.clone())?;
            self.backends.store.save_secret(&secret).await?;
            deployed.push(revision);
        }
        drop(value);

        let mut consumers = Vec::with_capacity(deployed.len());
        for revision in deployed {
            let (outcome, attempts) = self
                .verify(&revision, &format, &new_fingerprint, &previous)
                .await?;
            secret.record_verification(&rotation_id, &revision.workload, outcome.clone(), attempts)?;
            if outcome.is_verified() {
                secret.mark_consumer_verified(&revision.workload, revision.revision.clone())?;
            }
            consumers.push(ConsumerReport {
                workload: revision.workload,
                revision: revision.revision,
                previous: revision.previous,
                outcome,
                attempts,
                retired: false,
            });
        }

        let verified = secret.complete_rotation(&rotation_id)?;
        self.backends.store.save_secret(&secret).await?;

        if !verified {
            let pending: Vec<String> = consumers
                .iter()
                .filter(|c| !c.outcome.is_verified())
                .map(|c| c.workload.clone())
                .collect();
            warn!(
                rotation = %rotation_id,
                pending = ?pending,
                "Verification budget exhausted; new revisions remain active and unverified"
            );
            return Err(SecretsError::VerificationTimeout {
                secret: name.to_string(),
                rotation: rotation_id,
                pending,
            });
        }

        info!(
            rotation = %rotation_id,
            grace_ms = self.settings.grace_period.as_millis() as u64,
            "Rotation verified"
        );
        tokio::time::sleep(self.settings.grace_period).await;

        for consumer in &mut consumers {
            let Some(previous) = &consumer.previous else {
                continue;
            };
            match self
                .backends
                .deployer
                .retire_revision(&consumer.workload, previous)
                .await
            {
                Ok(()) => consumer.retired = true,
                Err(failure) => warn!(
                    workload = %consumer.workload,
                    revision = %previous,
                    error = %failure,
                    "Previous revision not retired"
                ),
            }
        }

        Ok(RotationReport {
            secret: name.to_string(),
            rotation_id,
            vault_ref: resolved,
            fingerprint: new_fingerprint,
            verified,
            consumers,
        })
    }

    /// Build `workload` with the current value of every secret it consumes
    ///
    /// Secrets that were never rotated are left out.
    pub async fn build_image(&self, workload: &str) -> SecretsResult<ImageRef> {
        self.build_for(workload, None).await
    }

    fn source(&self, workload: &str) -> SecretsResult<&WorkloadSource> {
        self.sources
            .get(workload)
            .ok_or_else(|| SecretsError::NoSource(workload.to_string()))
    }

    async fn build_for(
        &self,
        workload: &str,
        fresh: Option<(&str, &SecretValue)>,
    ) -> SecretsResult<ImageRef> {
        let source = self.source(workload)?;

        let mut args = BuildArgs::new();
        for spec in self.specs.values() {
            let Some(consumer) = spec.consumer(workload) else {
                continue;
            };
            match fresh {
                Some((name, value)) if name == spec.name => {
                    args.insert(&consumer.env_var, value.clone());
                }
                _ => {
                    if let Some(stored) = self.backends.store.secret(&spec.name).await? {
                        if stored.latest_rotation().is_some() {
                            let value = self.read(&spec.name, &stored.vault_ref).await?;
                            args.insert(&consumer.env_var, value);
                        }
                    }
                }
            }
        }

        let request = BuildRequest {
            workload: workload.to_string(),
            source_ref: source.source_ref.clone(),
            args,
        };
        let image = retry(&self.settings.retry, "build", || {
            self.backends.builder.build(&request)
        })
        .await
        .map_err(|error| SecretsError::Build {
            workload: workload.to_string(),
            error,
        })?;

        info!(workload, image = %image, args = ?request.args, "Image built");
        Ok(image)
    }

    /// Pin an unversioned reference to the latest version
    async fn resolve(&self, name: &str, vault_ref: &VaultRef) -> SecretsResult<VaultRef> {
        if vault_ref.version.is_some() {
            return Ok(vault_ref.clone());
        }

        let versions = retry(&self.settings.retry, "list_versions", || {
            self.backends.vault.list_versions(&vault_ref.name)
        })
        .await
        .map_err(|error| SecretsError::Vault {
            secret: name.to_string(),
            error,
        })?;

        versions
            .last()
            .map(|latest| VaultRef::pinned(&vault_ref.name, latest))
            .ok_or_else(|| SecretsError::NoVersions(vault_ref.name.clone()))
    }

    async fn read(&self, name: &str, vault_ref: &VaultRef) -> SecretsResult<SecretValue> {
        retry(&self.settings.retry, "get_secret", || {
            self.backends
                .vault
                .get_secret(&vault_ref.name, vault_ref.version.as_deref())
        })
        .await
        .map_err(|error| SecretsError::Vault {
            secret: name.to_string(),
            error,
        })
    }

    async fn verify(
        &self,
        revision: &DeployedRevision,
        format: &CompiledFormat,
        expected: &Fingerprint,
        previous: &[Fingerprint],
    ) -> SecretsResult<(VerificationOutcome, u32)> {
        let url = self
            .source(&revision.workload)?
            .artifact_url(&revision.service_url);
        Ok(verify_served(
            self.backends.artifacts.as_ref(),
            &url,
            format,
            expected,
            previous,
            &self.settings.verification,
            self.settings.propagation_delay,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::DeployFailure;
    use async_trait::async_trait;
    use ebb_cloud::{
        ApplyRequest, ArtifactRegistry, CloudControl, LocalBuilder, MemoryVault, SimulatedCloud,
    };
    use ebb_store::InMemoryStateStore;
    use ebb_types::{LayerState, ScaleConfig};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const OLD: &str = "0123456789abcdef0123456789abcdef";
    const NEW: &str = "fedcba9876543210fedcba9876543210";

    /// Creates and routes revisions straight on the simulated cloud
    struct DirectDeployer {
        cloud: Arc<SimulatedCloud>,
        retired: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl RevisionDeployer for DirectDeployer {
        async fn deploy_revision(
            &self,
            workload: &str,
            image: ImageRef,
        ) -> Result<DeployedRevision, DeployFailure> {
            let previous = self.cloud.serving_revision(workload);
            let set = self
                .cloud
                .create_or_update(&ApplyRequest::WorkloadRevision {
                    workload: workload.to_string(),
                    image,
                    scale: ScaleConfig::default(),
                })
                .await
                .map_err(|e| DeployFailure::new("apply", e.to_string()))?;
            let revision = set.revision.clone().unwrap();
            self.cloud
                .activate_revision(workload, &revision)
                .await
                .map_err(|e| DeployFailure::new("activate", e.to_string()))?;
            Ok(DeployedRevision {
                workload: workload.to_string(),
                revision,
                previous,
                service_url: set.service_url.unwrap(),
                resources: set.resources,
            })
        }

        async fn retire_revision(
            &self,
            workload: &str,
            revision: &RevisionId,
        ) -> Result<(), DeployFailure> {
            self.retired
                .lock()
                .unwrap()
                .push((revision.to_string(), Instant::now()));
            self.cloud
                .retire_revision(workload, revision)
                .await
                .map_err(|e| DeployFailure::new("retire", e.to_string()))
        }
    }

    struct Harness {
        cloud: Arc<SimulatedCloud>,
        builder: Arc<LocalBuilder>,
        vault: Arc<MemoryVault>,
        store: Arc<InMemoryStateStore>,
        deployer: Arc<DirectDeployer>,
        pipeline: SecretPipeline,
    }

    async fn harness() -> Harness {
        let registry = ArtifactRegistry::new();
        let cloud = Arc::new(SimulatedCloud::new(registry.clone()));
        let builder = Arc::new(LocalBuilder::new("registry.local", registry));
        let vault = Arc::new(
            MemoryVault::new()
                .with_secret("auth-client-id", "1", OLD)
                .with_secret("auth-client-id", "2", NEW),
        );
        let store = Arc::new(InMemoryStateStore::new());
        store
            .transition(LayerKind::Compute, "apps", &[Phase::Absent], LayerState::Active)
            .await
            .unwrap();
        let deployer = Arc::new(DirectDeployer {
            cloud: cloud.clone(),
            retired: Default::default(),
        });

        let spec = SecretSpec {
            name: "auth-client-id".into(),
            format: SecretFormat::FixedAlphanumeric { length: 32 },
            consumers: vec![ConsumerSpec {
                workload: "web".into(),
                env_var: "AUTH_CLIENT_ID".into(),
            }],
        };
        let sources = BTreeMap::from([(
            "web".to_string(),
            WorkloadSource {
                source_ref: "git:main".into(),
                bundle_path: "/assets/app.js".into(),
            },
        )]);
        let pipeline = SecretPipeline::new(
            vec![spec],
            sources,
            PipelineBackends {
                store: store.clone(),
                vault: vault.clone(),
                builder: builder.clone(),
                deployer: deployer.clone(),
                artifacts: cloud.clone(),
            },
            PipelineSettings {
                verification: RetryPolicy {
                    max_attempts: 4,
                    initial_delay_ms: 1_000,
                    max_delay_ms: 8_000,
                    multiplier: 2.0,
                    total_timeout_ms: 120_000,
                },
                propagation_delay: Duration::from_secs(2),
                grace_period: Duration::from_secs(60),
                retry: RetryPolicy::immediate(3),
            },
        );

        Harness {
            cloud,
            builder,
            vault,
            store,
            deployer,
            pipeline,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_value_never_reaches_build() {
        let h = harness().await;
        h.vault.put("auth-client-id", "3", &"x".repeat(31));
        let err = h
            .pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "3"))
            .await
            .unwrap_err();

        assert!(matches!(err, SecretsError::InvalidFormat { .. }));
        assert!(!err.to_string().contains(&"x".repeat(31)));
        assert_eq!(h.builder.builds(), 0);
        assert_eq!(h.cloud.mutating_calls(), 0);
        assert!(h.store.secret("auth-client-id").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verified_rotation_retires_previous_after_grace() {
        let h = harness().await;
        h.pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "1"))
            .await
            .unwrap();

        let report = h
            .pipeline
            .rotate("auth-client-id", &VaultRef::new("auth-client-id", None))
            .await
            .unwrap();

        assert!(report.verified);
        assert_eq!(report.vault_ref, VaultRef::pinned("auth-client-id", "2"));
        let consumer = &report.consumers[0];
        assert!(consumer.retired);
        assert_eq!(consumer.outcome, VerificationOutcome::Verified);

        let secret = h.store.secret("auth-client-id").await.unwrap().unwrap();
        assert!(secret.rotation(&report.rotation_id).unwrap().verified);
        assert_eq!(secret.last_verified, Some(report.fingerprint.clone()));

        let activated = h
            .cloud
            .calls()
            .into_iter()
            .filter(|c| c.operation == "activate_revision")
            .last()
            .unwrap()
            .at;
        let retired = h.deployer.retired.lock().unwrap().last().unwrap().1;
        assert!(retired - activated >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_is_outlasted() {
        let h = harness().await;
        h.pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "1"))
            .await
            .unwrap();

        h.cloud.serve_stale("web", Some(2));
        let report = h
            .pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "2"))
            .await
            .unwrap();
        assert_eq!(report.consumers[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_timeout_keeps_new_revision_serving() {
        let h = harness().await;
        h.pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "1"))
            .await
            .unwrap();

        h.cloud.serve_stale("web", None);
        let err = h
            .pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "2"))
            .await
            .unwrap_err();

        let SecretsError::VerificationTimeout { rotation, pending, .. } = err else {
            panic!("expected verification timeout");
        };
        assert_eq!(pending, vec!["web".to_string()]);

        let secret = h.store.secret("auth-client-id").await.unwrap().unwrap();
        let record = secret.rotation(&rotation).unwrap();
        assert!(!record.verified);
        assert_eq!(
            h.cloud.serving_revision("web").as_ref(),
            record.revisions.get("web")
        );
        let result = &record.verification["web"];
        assert_eq!(result.attempts, 4);
        assert!(matches!(result.outcome, VerificationOutcome::Stale { .. }));
        assert!(h.deployer.retired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_active_compute() {
        let h = harness().await;
        h.store
            .transition(LayerKind::Compute, "apps", &[Phase::Active], LayerState::Paused)
            .await
            .unwrap();

        let err = h
            .pipeline
            .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "2"))
            .await
            .unwrap_err();
        assert_eq!(err, SecretsError::ComputeNotActive(Phase::Paused));
        assert_eq!(h.builder.builds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_secret_and_vault_errors() {
        let h = harness().await;
        assert!(matches!(
            h.pipeline
                .rotate("db-password", &VaultRef::new("db-password", None))
                .await,
            Err(SecretsError::UnknownSecret(_))
        ));

        h.vault.fail_next(5);
        assert!(matches!(
            h.pipeline
                .rotate("auth-client-id", &VaultRef::pinned("auth-client-id", "2"))
                .await,
            Err(SecretsError::Vault { .. })
        ));
        assert_eq!(h.cloud.mutating_calls(), 0);
    }
}
