//! The lifecycle controller
//!
//! One sequential state machine per layer. Every mutating operation first
//! moves its layer into the operation's transient state through a
//! compare-and-set on the store, so a second operation issued while one is in
//! flight is rejected rather than queued. Validation and dependency checks run
//! before that transition and never mutate anything.

use crate::config::EbbConfig;
use crate::deployer::WorkloadDeployer;
use crate::error::{ControlError, ControlResult};
use crate::events::EventAggregator;
use crate::occupancy::{ComputeOccupancy, Occupied};
use crate::status::{LayerStatus, SecretStatus, StatusReport, WorkloadStatus};
use ebb_cloud::{retry, ApplyRequest, CloudControl, ResourceSet};
use ebb_costs::{CostPlan, CostPolicyEngine, WorkloadDemand};
use ebb_secrets::{DeployFailure, RotationReport, SecretPipeline};
use ebb_store::{StateStore, StoreError, Transition};
use ebb_types::{
    BudgetAlert, EbbEvent, EbbEventEnvelope, EventSource, ImageRef, InvalidTransition, LayerKind,
    LayerOperation, LayerState, Phase, ResourceId, ResourceLayer, RevisionId, RevisionStatus,
    ScaleConfig, VaultRef, WorkloadError,
};
use ebb_validator::{validate_scale, DeploymentValidator};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Outcome of a mutating layer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The layer moved to the operation's target state
    Applied,
    /// The layer was already in the target state; nothing was done
    AlreadyConverged,
}

/// One workload rolled out by a compute operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolledOut {
    pub workload: String,
    pub revision: RevisionId,
    pub image: ImageRef,
    pub scale: ScaleConfig,
}

/// Result of `deploy_compute` / `resume`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeReport {
    pub outcome: Outcome,
    pub workloads: Vec<RolledOut>,
    pub alert: Option<BudgetAlert>,
}

impl ComputeReport {
    fn converged() -> Self {
        Self {
            outcome: Outcome::AlreadyConverged,
            workloads: Vec::new(),
            alert: None,
        }
    }
}

/// Result of `rollback`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub workload: String,
    pub from: Option<RevisionId>,
    pub to: RevisionId,
}

/// Sequences the data and compute planes
pub struct LifecycleController {
    config: Arc<EbbConfig>,
    store: Arc<dyn StateStore>,
    cloud: Arc<dyn CloudControl>,
    validator: Arc<DeploymentValidator>,
    deployer: Arc<WorkloadDeployer>,
    pipeline: SecretPipeline,
    costs: CostPolicyEngine,
    events: EventAggregator,
    occupancy: ComputeOccupancy,
}

impl LifecycleController {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<EbbConfig>,
        store: Arc<dyn StateStore>,
        cloud: Arc<dyn CloudControl>,
        validator: Arc<DeploymentValidator>,
        deployer: Arc<WorkloadDeployer>,
        pipeline: SecretPipeline,
        costs: CostPolicyEngine,
        events: EventAggregator,
    ) -> Self {
        Self {
            config,
            store,
            cloud,
            validator,
            deployer,
            pipeline,
            costs,
            events,
            occupancy: ComputeOccupancy::new(),
        }
    }

    pub fn config(&self) -> &EbbConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EbbEventEnvelope> {
        self.events.subscribe()
    }

    fn layer_name(&self, kind: LayerKind) -> &str {
        match kind {
            LayerKind::Data => &self.config.layers.data,
            LayerKind::Compute => &self.config.layers.compute,
        }
    }

    async fn phase(&self, kind: LayerKind) -> ControlResult<Phase> {
        Ok(self
            .store
            .layer(kind)
            .await?
            .map(|layer| layer.phase())
            .unwrap_or(Phase::Absent))
    }

    /// Secrets whose rotation currently holds its lock
    fn rotating_secrets(&self) -> Vec<String> {
        self.config
            .secrets
            .iter()
            .filter(|spec| self.pipeline.locks().is_held(&spec.name))
            .map(|spec| spec.name.clone())
            .collect()
    }

    /// Hold the compute layer against rotations for a lifecycle operation
    fn occupy_compute(&self, operation: &'static str) -> ControlResult<Occupied<'_>> {
        self.occupancy
            .enter_operation()
            .ok_or_else(|| ControlError::RotationInFlight {
                operation,
                secrets: self.rotating_secrets(),
            })
    }

    // ========== State machine plumbing ==========

    /// Move a transient state that outlived its timeout to Failed
    async fn recover_stale(&self, kind: LayerKind) -> ControlResult<()> {
        let Some(layer) = self.store.layer(kind).await? else {
            return Ok(());
        };
        let timeout = self.config.lifecycle.transient_timeout();
        if !layer.is_stale(chrono::Utc::now(), timeout) {
            return Ok(());
        }

        let phase = layer.phase();
        let during = match phase {
            Phase::Deploying => LayerOperation::Deploy,
            Phase::Pausing => LayerOperation::Pause,
            Phase::Resuming => LayerOperation::Resume,
            _ => LayerOperation::Decommission,
        };
        let failed = LayerState::failed(
            during,
            "transient_timeout",
            format!(
                "{} for longer than {}s",
                phase, self.config.lifecycle.transient_timeout_secs
            ),
        );

        match self
            .store
            .transition(kind, &layer.name, &[phase], failed)
            .await
        {
            Ok(_) => {
                warn!(layer = %kind, phase = %phase, since = %layer.since, "Recovered stale transient state");
                self.events.emit_warning(
                    EbbEvent::StaleTransientRecovered { layer: kind, phase },
                    EventSource::Controller,
                );
                Ok(())
            }
            // Someone else resolved it first
            Err(StoreError::TransitionRejected { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Read-only check that `operation` may start on `kind`
    async fn check_begin(&self, kind: LayerKind, operation: LayerOperation) -> ControlResult<()> {
        match self.store.layer(kind).await? {
            Some(layer) => Ok(layer.check_begin(operation)?),
            None => Ok(ResourceLayer::new(kind, self.layer_name(kind)).check_begin(operation)?),
        }
    }

    /// Enter the operation's transient state
    async fn begin(&self, kind: LayerKind, operation: LayerOperation) -> ControlResult<Transition> {
        let next = operation.in_flight();
        let to = next.phase();
        let transition = self
            .store
            .transition(
                kind,
                self.layer_name(kind),
                operation.allowed_from(kind),
                next,
            )
            .await
            .map_err(|err| match err {
                StoreError::TransitionRejected {
                    kind,
                    current,
                    allowed,
                } => ControlError::InvalidState(InvalidTransition {
                    kind,
                    operation,
                    current,
                    expected: allowed,
                }),
                other => other.into(),
            })?;

        info!(layer = %kind, operation = %operation, from = %transition.from, "Layer operation started");
        self.events.emit_info(
            EbbEvent::LayerTransitioned {
                layer: kind,
                operation,
                from: transition.from,
                to,
            },
            EventSource::Controller,
        );
        Ok(transition)
    }

    /// Leave the transient state for the operation's target state
    async fn finish(
        &self,
        mut layer: ResourceLayer,
        operation: LayerOperation,
        resources: Vec<ResourceId>,
    ) -> ControlResult<()> {
        let from = layer.phase();
        layer.resources = resources;
        layer.set_state(operation.target());
        self.store.save_layer(&layer).await?;

        info!(layer = %layer.kind, operation = %operation, to = %layer.phase(), "Layer operation completed");
        self.events.emit_info(
            EbbEvent::LayerTransitioned {
                layer: layer.kind,
                operation,
                from,
                to: layer.phase(),
            },
            EventSource::Controller,
        );
        Ok(())
    }

    /// Record the failing check on the layer and build the error to return
    async fn fail(
        &self,
        mut layer: ResourceLayer,
        operation: LayerOperation,
        check: &str,
        reason: String,
    ) -> ControlError {
        warn!(layer = %layer.kind, operation = %operation, check, reason = %reason, "Layer operation failed");
        layer.set_state(LayerState::failed(operation, check, reason.clone()));
        if let Err(err) = self.store.save_layer(&layer).await {
            warn!(layer = %layer.kind, error = %err, "Failed state not persisted");
        }
        self.events.emit_error(
            EbbEvent::LayerFailed {
                layer: layer.kind,
                operation,
                check: check.to_string(),
                reason: reason.clone(),
            },
            EventSource::Controller,
        );
        ControlError::deployment(layer.kind, check, reason)
    }

    fn emit_alert(&self, alert: &Option<BudgetAlert>) {
        if let Some(alert) = alert {
            self.events
                .emit_warning(EbbEvent::BudgetExceeded(alert.clone()), EventSource::CostPolicy);
        }
    }

    // ========== Data layer ==========

    /// Create the data plane: pre-checks, apply, existence and connectivity post-checks
    #[instrument(skip(self), fields(layer = %self.config.layers.data))]
    pub async fn deploy_data(&self) -> ControlResult<Outcome> {
        self.recover_stale(LayerKind::Data).await?;
        self.check_begin(LayerKind::Data, LayerOperation::Deploy).await?;

        let template = &self.config.data.template;
        self.validator.pre_check_data(template).await?;

        let transition = self.begin(LayerKind::Data, LayerOperation::Deploy).await?;
        let mut layer = transition.layer;

        let request = ApplyRequest::DataLayer {
            layer: layer.name.clone(),
            template: template.clone(),
        };
        let set = match retry(&self.config.retry, "create_or_update", || {
            self.cloud.create_or_update(&request)
        })
        .await
        {
            Ok(set) => set,
            Err(err) => {
                return Err(self
                    .fail(layer, LayerOperation::Deploy, "apply", err.to_string())
                    .await)
            }
        };
        // Created resources stay tracked so a failed layer can still be decommissioned
        layer.resources = set.resources.clone();

        if let Err(err) = self.validator.confirm_resources(&set.resources).await {
            return Err(self
                .fail(layer, LayerOperation::Deploy, err.check(), err.to_string())
                .await);
        }

        match &self.config.data.connectivity_url {
            Some(url) => {
                if let Err(err) = self.validator.probe_health(url).await {
                    return Err(self
                        .fail(layer, LayerOperation::Deploy, err.check(), err.to_string())
                        .await);
                }
            }
            None => debug!("No connectivity probe configured"),
        }

        self.finish(layer, LayerOperation::Deploy, set.resources)
            .await?;
        Ok(Outcome::Applied)
    }

    /// Irreversibly delete the data plane
    ///
    /// Needs `confirm` and a compute layer that is Absent or Paused.
    #[instrument(skip(self))]
    pub async fn decommission_data(&self, confirm: bool) -> ControlResult<Outcome> {
        if !confirm {
            return Err(ControlError::NotConfirmed);
        }
        self.recover_stale(LayerKind::Data).await?;

        let compute = self.phase(LayerKind::Compute).await?;
        if !matches!(compute, Phase::Absent | Phase::Paused) {
            return Err(ControlError::ComputeRunning(compute));
        }
        let data = self.phase(LayerKind::Data).await?;
        if LayerOperation::Decommission.converged_phase() == Some(data) {
            info!("Data layer already absent");
            return Ok(Outcome::AlreadyConverged);
        }

        let transition = self
            .begin(LayerKind::Data, LayerOperation::Decommission)
            .await?;
        let layer = transition.layer;

        let resources = ResourceSet::of(layer.resources.clone());
        if let Err(failure) = self.deployer.delete(&resources).await {
            return Err(self
                .fail(layer, LayerOperation::Decommission, &failure.check, failure.reason)
                .await);
        }

        self.finish(layer, LayerOperation::Decommission, Vec::new())
            .await?;
        warn!("Data layer decommissioned");
        Ok(Outcome::Applied)
    }

    // ========== Compute layer ==========

    /// Fail fast unless the data layer is Active; performs no mutation
    async fn require_data_active(&self) -> ControlResult<()> {
        let data = self.phase(LayerKind::Data).await?;
        if data == Phase::Active {
            Ok(())
        } else {
            Err(ControlError::Dependency {
                layer: LayerKind::Compute,
                requires: LayerKind::Data,
                current: data,
            })
        }
    }

    fn demands(&self) -> Vec<WorkloadDemand> {
        self.config
            .workloads
            .iter()
            .map(|w| WorkloadDemand::new(&w.name, w.traffic.clone()))
            .collect()
    }

    /// Cost plan for the configured workloads; never mutates
    pub fn plan(&self) -> ControlResult<CostPlan> {
        let plan = self.costs.plan(&self.demands())?;
        for workload in &plan.workloads {
            validate_scale(&workload.workload, &workload.scale)?;
        }
        self.emit_alert(&plan.alert);
        Ok(plan)
    }

    /// Image for a workload's first rollout
    ///
    /// Last known-good image, then the configured image, then a fresh build.
    async fn initial_image(&self, workload: &str) -> Result<ImageRef, DeployFailure> {
        if let Some(stored) = self
            .store
            .workload(workload)
            .await
            .map_err(|e| DeployFailure::new("state_store", e.to_string()))?
        {
            return Ok(stored.image);
        }
        if let Some(image) = self.config.workload(workload).and_then(|w| w.image.clone()) {
            return Ok(image);
        }
        self.pipeline
            .build_image(workload)
            .await
            .map_err(|e| DeployFailure::new("build", e.to_string()))
    }

    async fn roll_out(
        &self,
        workload: &str,
        image: ImageRef,
        scale: ScaleConfig,
    ) -> Result<(RolledOut, Vec<ResourceId>), DeployFailure> {
        let deployed = self.deployer.deploy(workload, image.clone(), scale.clone()).await?;
        self.events.emit_info(
            EbbEvent::RevisionActivated {
                workload: workload.to_string(),
                revision: deployed.revision.clone(),
            },
            EventSource::Controller,
        );
        Ok((
            RolledOut {
                workload: workload.to_string(),
                revision: deployed.revision,
                image,
                scale,
            },
            deployed.resources,
        ))
    }

    /// Deploy every workload at the scale the cost policy derives
    ///
    /// Valid from Absent, Failed, or Active (applies a new scale plan).
    #[instrument(skip(self), fields(layer = %self.config.layers.compute))]
    pub async fn deploy_compute(&self) -> ControlResult<ComputeReport> {
        let _occupied = self.occupy_compute("deploy-compute")?;
        self.require_data_active().await?;
        self.recover_stale(LayerKind::Compute).await?;
        self.check_begin(LayerKind::Compute, LayerOperation::Deploy)
            .await?;
        let plan = self.plan()?;

        let transition = self
            .begin(LayerKind::Compute, LayerOperation::Deploy)
            .await?;
        let layer = transition.layer;

        let mut resources = layer.resources.clone();
        let mut workloads = Vec::with_capacity(plan.workloads.len());
        for planned in &plan.workloads {
            let result = match self.initial_image(&planned.workload).await {
                Ok(image) => {
                    self.roll_out(&planned.workload, image, planned.scale.clone())
                        .await
                }
                Err(failure) => Err(failure),
            };
            match result {
                Ok((rolled, owned)) => {
                    merge(&mut resources, owned);
                    workloads.push(rolled);
                }
                Err(failure) => {
                    let reason = format!("{}: {}", planned.workload, failure.reason);
                    let mut layer = layer;
                    layer.resources = resources;
                    return Err(self
                        .fail(layer, LayerOperation::Deploy, &failure.check, reason)
                        .await);
                }
            }
        }

        self.finish(layer, LayerOperation::Deploy, resources).await?;
        Ok(ComputeReport {
            outcome: Outcome::Applied,
            workloads,
            alert: plan.alert,
        })
    }

    /// Stop all compute resources; the data layer is untouched
    ///
    /// Idempotent: pausing a paused layer succeeds without doing anything.
    #[instrument(skip(self), fields(layer = %self.config.layers.compute))]
    pub async fn pause(&self) -> ControlResult<Outcome> {
        let _occupied = self.occupy_compute("pause")?;
        self.recover_stale(LayerKind::Compute).await?;
        let compute = self.phase(LayerKind::Compute).await?;
        if LayerOperation::Pause.converged_phase() == Some(compute) {
            info!("Compute layer already paused");
            return Ok(Outcome::AlreadyConverged);
        }

        let transition = self
            .begin(LayerKind::Compute, LayerOperation::Pause)
            .await?;
        let layer = transition.layer;

        let resources = ResourceSet::of(layer.resources.clone());
        if let Err(failure) = self.deployer.delete(&resources).await {
            return Err(self
                .fail(layer, LayerOperation::Pause, &failure.check, failure.reason)
                .await);
        }

        // Revisions went with the service; image and scale stay as the last known-good configuration
        let workloads = match self.store.workloads().await {
            Ok(workloads) => workloads,
            Err(err) => {
                return Err(self
                    .fail(layer, LayerOperation::Pause, "state_store", err.to_string())
                    .await)
            }
        };
        for mut workload in workloads {
            workload.deactivate();
            for revision in &mut workload.revisions {
                revision.status = RevisionStatus::Retired;
            }
            if let Err(err) = self.store.save_workload(&workload).await {
                return Err(self
                    .fail(layer, LayerOperation::Pause, "state_store", err.to_string())
                    .await);
            }
        }

        self.finish(layer, LayerOperation::Pause, Vec::new()).await?;
        Ok(Outcome::Applied)
    }

    /// Re-apply the last known-good workload configuration
    ///
    /// Valid from Paused or Absent (cold resume). Deploys the data layer first
    /// if it is not Active. Idempotent: resuming an active layer succeeds
    /// without doing anything.
    #[instrument(skip(self), fields(layer = %self.config.layers.compute))]
    pub async fn resume(&self) -> ControlResult<ComputeReport> {
        let _occupied = self.occupy_compute("resume")?;
        self.recover_stale(LayerKind::Compute).await?;
        let compute = self.phase(LayerKind::Compute).await?;
        if LayerOperation::Resume.converged_phase() == Some(compute) {
            info!("Compute layer already active");
            return Ok(ComputeReport::converged());
        }
        self.check_begin(LayerKind::Compute, LayerOperation::Resume)
            .await?;

        if self.phase(LayerKind::Data).await? != Phase::Active {
            info!("Data layer not active, deploying it first");
            self.deploy_data().await?;
        }
        self.require_data_active().await?;

        // Workloads never deployed before get a fresh plan
        let mut targets = Vec::with_capacity(self.config.workloads.len());
        let mut fresh = None;
        for declared in &self.config.workloads {
            match self.store.workload(&declared.name).await? {
                Some(stored) => {
                    targets.push((declared.name.clone(), Some(stored.image), stored.scale))
                }
                None => {
                    if fresh.is_none() {
                        fresh = Some(self.plan()?);
                    }
                    let scale = fresh
                        .as_ref()
                        .and_then(|plan| plan.scale_for(&declared.name))
                        .cloned()
                        .unwrap_or_default();
                    targets.push((declared.name.clone(), None, scale));
                }
            }
        }

        let transition = self
            .begin(LayerKind::Compute, LayerOperation::Resume)
            .await?;
        let layer = transition.layer;

        let mut resources = layer.resources.clone();
        let mut workloads = Vec::with_capacity(targets.len());
        for (name, image, scale) in targets {
            let image = match image {
                Some(image) => Ok(image),
                None => self.initial_image(&name).await,
            };
            let result = match image {
                Ok(image) => self.roll_out(&name, image, scale).await,
                Err(failure) => Err(failure),
            };
            match result {
                Ok((rolled, owned)) => {
                    merge(&mut resources, owned);
                    workloads.push(rolled);
                }
                Err(failure) => {
                    let reason = format!("{}: {}", name, failure.reason);
                    let mut layer = layer;
                    layer.resources = resources;
                    return Err(self
                        .fail(layer, LayerOperation::Resume, &failure.check, reason)
                        .await);
                }
            }
        }

        self.finish(layer, LayerOperation::Resume, resources).await?;
        Ok(ComputeReport {
            outcome: Outcome::Applied,
            workloads,
            alert: fresh.and_then(|plan| plan.alert),
        })
    }

    /// Route a workload's traffic back to a retained revision
    ///
    /// Defaults to the most recent standby revision.
    #[instrument(skip(self), fields(workload = %workload))]
    pub async fn rollback(
        &self,
        workload: &str,
        revision: Option<RevisionId>,
    ) -> ControlResult<RollbackReport> {
        let _occupied = self.occupy_compute("rollback")?;
        let compute = self.phase(LayerKind::Compute).await?;
        if compute != Phase::Active {
            return Err(ControlError::NotActive {
                layer: LayerKind::Compute,
                current: compute,
            });
        }

        let mut record = self
            .store
            .workload(workload)
            .await?
            .ok_or_else(|| ControlError::UnknownWorkload(workload.to_string()))?;
        let target = match revision {
            Some(id) => id,
            None => record
                .rollback_target()
                .map(|r| r.id.clone())
                .ok_or_else(|| WorkloadError::NoRollbackTarget(workload.to_string()))?,
        };
        if record.active_revision.as_ref() == Some(&target) {
            return Err(WorkloadError::RevisionActive {
                workload: workload.to_string(),
                revision: target,
            }
            .into());
        }

        // Validate against the record before touching the cloud
        let from = record.active_revision.clone();
        let mut updated = record.clone();
        updated.activate(&target)?;

        retry(&self.config.retry, "activate_revision", || {
            self.cloud.activate_revision(workload, &target)
        })
        .await
        .map_err(|e| ControlError::deployment(LayerKind::Compute, "activate", e))?;

        record = updated;
        self.store.save_workload(&record).await?;

        info!(from = ?from, to = %target, "Rolled back");
        self.events.emit_info(
            EbbEvent::RolledBack {
                workload: workload.to_string(),
                from: from.clone(),
                to: target.clone(),
            },
            EventSource::Controller,
        );
        Ok(RollbackReport {
            workload: workload.to_string(),
            from,
            to: target,
        })
    }

    /// Drop a workload's oldest revisions so at most `keep` remain
    ///
    /// The active revision is never pruned.
    #[instrument(skip(self), fields(workload = %workload))]
    pub async fn prune(&self, workload: &str, keep: usize) -> ControlResult<Vec<RevisionId>> {
        let _occupied = self.occupy_compute("prune")?;
        let mut record = self
            .store
            .workload(workload)
            .await?
            .ok_or_else(|| ControlError::UnknownWorkload(workload.to_string()))?;
        let removed = self.deployer.prune_record(&mut record, keep).await;
        self.store.save_workload(&record).await?;
        info!(removed = removed.len(), "Pruned revisions");
        Ok(removed)
    }

    // ========== Secrets ==========

    /// Rotate a secret to the vault value `vault_ref` points at
    #[instrument(skip(self), fields(secret = %name, vault_ref = %vault_ref))]
    pub async fn rotate_secret(
        &self,
        name: &str,
        vault_ref: &VaultRef,
    ) -> ControlResult<RotationReport> {
        let _occupied = self
            .occupancy
            .enter_rotation()
            .ok_or_else(|| ControlError::ComputeBusy(name.to_string()))?;
        match self.pipeline.rotate(name, vault_ref).await {
            Ok(report) => {
                self.events.emit_info(
                    EbbEvent::RotationStarted {
                        secret: report.secret.clone(),
                        rotation_id: report.rotation_id,
                        fingerprint: report.fingerprint.clone(),
                    },
                    EventSource::SecretPipeline,
                );
                for consumer in &report.consumers {
                    self.events.emit_info(
                        EbbEvent::RevisionActivated {
                            workload: consumer.workload.clone(),
                            revision: consumer.revision.clone(),
                        },
                        EventSource::SecretPipeline,
                    );
                    if let (true, Some(previous)) = (consumer.retired, &consumer.previous) {
                        self.events.emit_info(
                            EbbEvent::RevisionRetired {
                                workload: consumer.workload.clone(),
                                revision: previous.clone(),
                            },
                            EventSource::SecretPipeline,
                        );
                    }
                }
                let attempts = report.consumers.iter().map(|c| c.attempts).max().unwrap_or(0);
                self.events.emit_info(
                    EbbEvent::RotationVerified {
                        secret: report.secret.clone(),
                        rotation_id: report.rotation_id,
                        attempts,
                    },
                    EventSource::SecretPipeline,
                );
                Ok(report)
            }
            Err(err) => {
                let err = ControlError::from(err);
                if let ControlError::VerificationTimeout {
                    secret,
                    rotation,
                    pending,
                } = &err
                {
                    self.emit_timeout(secret, rotation, pending).await;
                }
                Err(err)
            }
        }
    }

    async fn emit_timeout(&self, secret: &str, rotation: &ebb_types::RotationId, pending: &[String]) {
        let record = match self.store.secret(secret).await {
            Ok(Some(stored)) => stored.rotation(rotation).cloned(),
            _ => None,
        };
        if let Some(record) = &record {
            self.events.emit_info(
                EbbEvent::RotationStarted {
                    secret: secret.to_string(),
                    rotation_id: record.id,
                    fingerprint: record.fingerprint.clone(),
                },
                EventSource::SecretPipeline,
            );
        }
        for workload in pending {
            let attempts = record
                .as_ref()
                .and_then(|r| r.verification.get(workload))
                .map(|v| v.attempts)
                .unwrap_or(0);
            self.events.emit_warning(
                EbbEvent::VerificationTimedOut {
                    secret: secret.to_string(),
                    rotation_id: *rotation,
                    workload: workload.clone(),
                    attempts,
                },
                EventSource::SecretPipeline,
            );
        }
    }

    // ========== Status ==========

    /// Both layers, workloads, secrets and the projected budget; never mutates
    pub async fn status(&self) -> ControlResult<StatusReport> {
        let timeout = self.config.lifecycle.transient_timeout();
        let data = LayerStatus::of(
            LayerKind::Data,
            self.layer_name(LayerKind::Data),
            self.store.layer(LayerKind::Data).await?,
            timeout,
        );
        let compute = LayerStatus::of(
            LayerKind::Compute,
            self.layer_name(LayerKind::Compute),
            self.store.layer(LayerKind::Compute).await?,
            timeout,
        );

        let workloads = self.store.workloads().await?;
        let budget = match self.costs.project(&workloads) {
            Ok(budget) => Some(budget),
            Err(err) => {
                debug!(error = %err, "Budget not projected");
                None
            }
        };

        Ok(StatusReport {
            data,
            compute,
            workloads: workloads.into_iter().map(WorkloadStatus::from).collect(),
            secrets: self
                .store
                .secrets()
                .await?
                .into_iter()
                .map(|secret| {
                    let rotating = self.pipeline.locks().is_held(&secret.name);
                    SecretStatus {
                        rotating,
                        ..SecretStatus::from(secret)
                    }
                })
                .collect(),
            budget,
        })
    }
}

fn merge(resources: &mut Vec<ResourceId>, owned: Vec<ResourceId>) {
    for id in owned {
        if !resources.contains(&id) {
            resources.push(id);
        }
    }
}
