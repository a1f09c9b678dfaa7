//! Deterministic in-memory backends
//!
//! [`SimulatedCloud`] behaves like a small provider: it owns named resources,
//! keeps revisions per workload service, routes traffic to one revision, and
//! answers health and artifact probes on `sim://` URLs:
//!
//! - `sim://data/{layer}`: healthy while the layer owns resources
//! - `sim://{workload}/rev/{revision}/...`: a single revision, bypassing routing
//! - `sim://{workload}/...`: whatever revision currently receives traffic
//!
//! Its state is serializable so a CLI can persist it between invocations.
//! Built bundles live in a separate [`ArtifactRegistry`]; callers that persist
//! the provider export them with [`ArtifactRegistry::bundles`].
//!
//! Fault knobs (scheduled failures, unhealthy endpoints, stale caches) and a
//! call log make it usable as a test double.

use crate::build::{BuildRequest, Builder};
use crate::cloud::{ApplyRequest, CloudControl, CloudRevision, ResourceSet};
use crate::error::{CloudError, CloudResult, ProbeError, VaultError, VaultResult};
use crate::probe::{ArtifactProbe, HealthProbe, ProbeStatus, ServedArtifact};
use crate::vault::{SecretValue, Vault};
use async_trait::async_trait;
use ebb_types::{ImageRef, ResourceId, ResourceKind, RevisionId, ScaleConfig};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

const MUTATING_OPERATIONS: &[&str] = &[
    "create_or_update",
    "delete",
    "activate_revision",
    "retire_revision",
];

/// Built bundles by image, shared between builder and cloud
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    bundles: Arc<RwLock<HashMap<ImageRef, String>>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, image: ImageRef, bundle: String) {
        self.bundles.write().insert(image, bundle);
    }

    pub fn bundle(&self, image: &ImageRef) -> Option<String> {
        self.bundles.read().get(image).cloned()
    }

    /// Restore bundles published by an earlier process
    pub fn from_bundles(bundles: HashMap<ImageRef, String>) -> Self {
        Self {
            bundles: Arc::new(RwLock::new(bundles)),
        }
    }

    pub fn bundles(&self) -> HashMap<ImageRef, String> {
        self.bundles.read().clone()
    }

    pub fn contains(&self, image: &ImageRef) -> bool {
        self.bundles.read().contains_key(image)
    }
}

/// A resource owned by a layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimResource {
    pub layer: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRevision {
    pub id: RevisionId,
    pub image: ImageRef,
    pub scale: ScaleConfig,
    pub retired: bool,
}

/// A workload service and its revisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimService {
    pub revisions: Vec<SimRevision>,
    pub serving: Option<RevisionId>,
    /// Revision that served before the current one (what a stale cache returns)
    pub previously_serving: Option<RevisionId>,
}

impl SimService {
    fn revision(&self, id: &RevisionId) -> Option<&SimRevision> {
        self.revisions.iter().find(|r| &r.id == id)
    }

    fn live_revision(&self, id: &RevisionId) -> Option<&SimRevision> {
        self.revision(id).filter(|r| !r.retired)
    }
}

/// Persistable provider state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedCloudState {
    /// `kind/name` keys claimed by someone else
    #[serde(default)]
    pub reserved_names: BTreeSet<String>,

    /// Owned resources by id
    #[serde(default)]
    pub resources: BTreeMap<String, SimResource>,

    /// Workload services by name
    #[serde(default)]
    pub services: BTreeMap<String, SimService>,

    #[serde(default)]
    pub next_revision: u64,
}

/// One recorded call against the simulated cloud
#[derive(Debug, Clone)]
pub struct CloudCall {
    pub operation: &'static str,
    pub target: String,
    pub at: Instant,
}

impl CloudCall {
    pub fn is_mutating(&self) -> bool {
        MUTATING_OPERATIONS.contains(&self.operation)
    }
}

#[derive(Debug, Default)]
struct Faults {
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    unhealthy: HashSet<String>,
    /// Workload -> remaining stale fetches (`None` = forever)
    stale: HashMap<String, Option<u32>>,
}

/// In-memory cloud provider
pub struct SimulatedCloud {
    state: Mutex<SimulatedCloudState>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<CloudCall>>,
    registry: ArtifactRegistry,
}

fn name_key(kind: ResourceKind, name: &str) -> String {
    format!("{}/{}", kind, name)
}

fn service_resource(workload: &str) -> String {
    format!("service/{}", workload)
}

impl SimulatedCloud {
    pub fn new(registry: ArtifactRegistry) -> Self {
        Self::from_state(SimulatedCloudState::default(), registry)
    }

    /// Restore a previously persisted provider
    pub fn from_state(state: SimulatedCloudState, registry: ArtifactRegistry) -> Self {
        Self {
            state: Mutex::new(state),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
            registry,
        }
    }

    pub fn snapshot(&self) -> SimulatedCloudState {
        self.state.lock().clone()
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Mark a name as owned by another tenant
    pub fn reserve_name(&self, kind: ResourceKind, name: &str) {
        self.state.lock().reserved_names.insert(name_key(kind, name));
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: &'static str, error: CloudError) {
        self.faults
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Make the probe endpoints under `sim://{host}` answer 503
    pub fn set_unhealthy(&self, host: &str, unhealthy: bool) {
        let mut faults = self.faults.lock();
        if unhealthy {
            faults.unhealthy.insert(host.to_string());
        } else {
            faults.unhealthy.remove(host);
        }
    }

    /// Serve the previous revision's bundle for `fetches` more fetches (`None` = forever)
    pub fn serve_stale(&self, workload: &str, fetches: Option<u32>) {
        self.faults
            .lock()
            .stale
            .insert(workload.to_string(), fetches);
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.calls.lock().clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_mutating()).count()
    }

    pub fn serving_revision(&self, workload: &str) -> Option<RevisionId> {
        self.state
            .lock()
            .services
            .get(workload)
            .and_then(|s| s.serving.clone())
    }

    fn record(&self, operation: &'static str, target: impl Into<String>) -> CloudResult<()> {
        let target = target.into();
        debug!(operation, target = %target, "Simulated cloud call");
        self.calls.lock().push(CloudCall {
            operation,
            target,
            at: Instant::now(),
        });
        match self
            .faults
            .lock()
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudControl for SimulatedCloud {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn name_available(&self, kind: ResourceKind, name: &str) -> CloudResult<bool> {
        self.record("name_available", name_key(kind, name))?;
        Ok(!self.state.lock().reserved_names.contains(&name_key(kind, name)))
    }

    async fn create_or_update(&self, request: &ApplyRequest) -> CloudResult<ResourceSet> {
        self.record("create_or_update", request.target())?;
        let mut state = self.state.lock();

        match request {
            ApplyRequest::DataLayer { layer, template } => {
                if let Some(taken) = template
                    .resources
                    .iter()
                    .find(|r| state.reserved_names.contains(&name_key(r.kind, &r.name)))
                {
                    return Err(CloudError::NameTaken {
                        name: taken.name.clone(),
                    });
                }

                let mut ids = Vec::with_capacity(template.resources.len());
                for spec in &template.resources {
                    let id = format!("{}/{}/{}", layer, spec.kind, spec.name);
                    state.resources.insert(
                        id.clone(),
                        SimResource {
                            layer: layer.clone(),
                            kind: spec.kind.to_string(),
                            name: spec.name.clone(),
                        },
                    );
                    ids.push(ResourceId::new(id));
                }
                Ok(ResourceSet::of(ids))
            }

            ApplyRequest::WorkloadRevision {
                workload,
                image,
                scale,
            } => {
                state.next_revision += 1;
                let id = RevisionId::new(format!("{}-{:05}", workload, state.next_revision));

                let resource = service_resource(workload);
                state.resources.insert(
                    resource.clone(),
                    SimResource {
                        layer: "compute".to_string(),
                        kind: "service".to_string(),
                        name: workload.clone(),
                    },
                );
                state
                    .services
                    .entry(workload.clone())
                    .or_default()
                    .revisions
                    .push(SimRevision {
                        id: id.clone(),
                        image: image.clone(),
                        scale: scale.clone(),
                        retired: false,
                    });

                Ok(ResourceSet {
                    resources: vec![ResourceId::new(resource)],
                    revision_url: Some(format!("sim://{}/rev/{}", workload, id)),
                    service_url: Some(format!("sim://{}", workload)),
                    revision: Some(id),
                })
            }
        }
    }

    async fn resource_exists(&self, id: &ResourceId) -> CloudResult<bool> {
        self.record("resource_exists", id.as_str())?;
        Ok(self.state.lock().resources.contains_key(id.as_str()))
    }

    async fn delete(&self, resources: &ResourceSet) -> CloudResult<()> {
        let target = resources
            .resources
            .iter()
            .map(ResourceId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.record("delete", target)?;

        let mut state = self.state.lock();
        for id in &resources.resources {
            state.resources.remove(id.as_str());
            if let Some(workload) = id.as_str().strip_prefix("service/") {
                state.services.remove(workload);
            }
        }
        Ok(())
    }

    async fn list_revisions(&self, workload: &str) -> CloudResult<Vec<CloudRevision>> {
        self.record("list_revisions", workload)?;
        let state = self.state.lock();
        Ok(state
            .services
            .get(workload)
            .map(|service| {
                service
                    .revisions
                    .iter()
                    .filter(|r| !r.retired)
                    .map(|r| CloudRevision {
                        id: r.id.clone(),
                        image: r.image.clone(),
                        serving: service.serving.as_ref() == Some(&r.id),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn activate_revision(&self, workload: &str, revision: &RevisionId) -> CloudResult<()> {
        self.record("activate_revision", format!("{}/{}", workload, revision))?;
        let mut state = self.state.lock();
        let service = state
            .services
            .get_mut(workload)
            .ok_or_else(|| CloudError::NotFound(format!("service {}", workload)))?;
        if service.live_revision(revision).is_none() {
            return Err(CloudError::NotFound(format!("revision {}", revision)));
        }

        if service.serving.as_ref() != Some(revision) {
            service.previously_serving = service.serving.replace(revision.clone());
        }
        Ok(())
    }

    async fn retire_revision(&self, workload: &str, revision: &RevisionId) -> CloudResult<()> {
        self.record("retire_revision", format!("{}/{}", workload, revision))?;
        let mut state = self.state.lock();
        let service = state
            .services
            .get_mut(workload)
            .ok_or_else(|| CloudError::NotFound(format!("service {}", workload)))?;
        if service.serving.as_ref() == Some(revision) {
            return Err(CloudError::permanent(
                "retire_revision",
                format!("revision {} is serving traffic", revision),
            ));
        }
        let target = service
            .revisions
            .iter_mut()
            .find(|r| &r.id == revision)
            .ok_or_else(|| CloudError::NotFound(format!("revision {}", revision)))?;
        target.retired = true;
        Ok(())
    }
}

/// Split `sim://host/rest` into host and path segments
fn parse_sim_url(url: &str) -> Option<(&str, Vec<&str>)> {
    let rest = url.strip_prefix("sim://")?;
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let host = segments.next()?;
    Some((host, segments.collect()))
}

#[async_trait]
impl HealthProbe for SimulatedCloud {
    async fn probe(&self, url: &str) -> ProbeStatus {
        let Some((host, path)) = parse_sim_url(url) else {
            return ProbeStatus::Unreachable {
                reason: format!("not a simulated url: {}", url),
            };
        };

        if self.faults.lock().unhealthy.contains(host) {
            return ProbeStatus::Unhealthy {
                reason: "HTTP 503 Service Unavailable".to_string(),
            };
        }

        let state = self.state.lock();
        if host == "data" {
            let layer = path.first().copied().unwrap_or_default();
            return if state.resources.values().any(|r| r.layer == layer) {
                ProbeStatus::Healthy
            } else {
                ProbeStatus::Unreachable {
                    reason: format!("data layer {} has no resources", layer),
                }
            };
        }

        let Some(service) = state.services.get(host) else {
            return ProbeStatus::Unreachable {
                reason: format!("no service {}", host),
            };
        };

        match path.as_slice() {
            ["rev", id, ..] => match service.live_revision(&RevisionId::new(*id)) {
                Some(_) => ProbeStatus::Healthy,
                None => ProbeStatus::Unreachable {
                    reason: format!("no revision {}", id),
                },
            },
            _ if service.serving.is_some() => ProbeStatus::Healthy,
            _ => ProbeStatus::Unhealthy {
                reason: "no revision receives traffic".to_string(),
            },
        }
    }
}

#[async_trait]
impl ArtifactProbe for SimulatedCloud {
    async fn fetch(&self, url: &str) -> Result<ServedArtifact, ProbeError> {
        let (host, _) =
            parse_sim_url(url).ok_or_else(|| ProbeError::InvalidUrl(url.to_string()))?;

        let revision = {
            let state = self.state.lock();
            let service = state.services.get(host).ok_or_else(|| ProbeError::Unreachable {
                url: url.to_string(),
                message: format!("no service {}", host),
            })?;

            let stale = {
                let mut faults = self.faults.lock();
                match faults.stale.get_mut(host) {
                    Some(None) => true,
                    Some(Some(0)) | None => false,
                    Some(Some(remaining)) => {
                        *remaining -= 1;
                        true
                    }
                }
            };

            let id = if stale {
                service.previously_serving.as_ref()
            } else {
                service.serving.as_ref()
            };
            id.and_then(|id| service.revision(id)).map(|r| r.image.clone())
        };

        let bundle = revision.and_then(|image| self.registry.bundle(&image));
        Ok(match bundle {
            Some(body) => ServedArtifact {
                url: url.to_string(),
                status_code: 200,
                body,
            },
            None => ServedArtifact {
                url: url.to_string(),
                status_code: 404,
                body: String::new(),
            },
        })
    }
}

/// Builder that renders bundles locally and publishes them to an [`ArtifactRegistry`]
///
/// Image tags are content-addressed: the digest covers the source ref and, per
/// build arg, its name and the hash of its value.
pub struct LocalBuilder {
    repository: String,
    registry: ArtifactRegistry,
    builds: AtomicU32,
    failures: Mutex<VecDeque<CloudError>>,
}

impl LocalBuilder {
    pub fn new(repository: impl Into<String>, registry: ArtifactRegistry) -> Self {
        Self {
            repository: repository.into(),
            registry,
            builds: AtomicU32::new(0),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of builds started
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: CloudError) {
        self.failures.lock().push_back(error);
    }

    /// Hex digest of the build inputs
    pub fn content_digest(request: &BuildRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.source_ref.as_bytes());
        hasher.update(b"\n");
        for (name, value) in request.args.iter() {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(hex::encode(Sha256::digest(value.expose().as_bytes())).as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    fn render(request: &BuildRequest) -> String {
        let mut bundle = format!(
            "/* {} built from {} */\n",
            request.workload, request.source_ref
        );
        for (name, value) in request.args.iter() {
            bundle.push_str(&format!("window.{}=\"{}\";\n", name, value.expose()));
        }
        bundle
    }
}

#[async_trait]
impl Builder for LocalBuilder {
    async fn build(&self, request: &BuildRequest) -> CloudResult<ImageRef> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let repository = format!("{}/{}", self.repository, request.workload);
        let image = ImageRef::from_digest(&repository, &Self::content_digest(request));
        self.registry.publish(image.clone(), Self::render(request));

        debug!(
            workload = %request.workload,
            image = %image,
            args = ?request.args,
            "Built image"
        );
        Ok(image)
    }
}

/// Order versions numerically when possible, lexicographically otherwise
fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
}

fn resolve(
    name: &str,
    versions: &BTreeMap<String, SecretValue>,
    version: Option<&str>,
) -> VaultResult<SecretValue> {
    match version {
        Some(version) => versions
            .get(version)
            .cloned()
            .ok_or_else(|| VaultError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            }),
        None => {
            let mut keys: Vec<String> = versions.keys().cloned().collect();
            sort_versions(&mut keys);
            keys.last()
                .and_then(|latest| versions.get(latest))
                .cloned()
                .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))
        }
    }
}

/// In-memory vault
#[derive(Default)]
pub struct MemoryVault {
    secrets: RwLock<HashMap<String, BTreeMap<String, SecretValue>>>,
    unavailable: AtomicU32,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: &str, version: &str, value: &str) -> Self {
        self.put(name, version, value);
        self
    }

    pub fn put(&self, name: &str, version: &str, value: &str) {
        self.secrets
            .write()
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), SecretValue::new(value));
    }

    /// Answer the next `count` calls with `Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.unavailable.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> VaultResult<()> {
        let failed = self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(VaultError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn get_secret(&self, name: &str, version: Option<&str>) -> VaultResult<SecretValue> {
        self.check_available()?;
        let secrets = self.secrets.read();
        let versions = secrets
            .get(name)
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))?;
        resolve(name, versions, version)
    }

    async fn list_versions(&self, name: &str) -> VaultResult<Vec<String>> {
        self.check_available()?;
        let secrets = self.secrets.read();
        let mut versions: Vec<String> = secrets
            .get(name)
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))?
            .keys()
            .cloned()
            .collect();
        sort_versions(&mut versions);
        Ok(versions)
    }
}

/// Vault backed by a TOML file of `[name]` tables mapping version to value
///
/// ```toml
/// [auth-client-id]
/// "1" = "..."
/// "2" = "..."
/// ```
///
/// The file is re-read on every call.
pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> VaultResult<HashMap<String, BTreeMap<String, SecretValue>>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| VaultError::File(format!("{}: {}", self.path.display(), e)))?;
        let raw: HashMap<String, BTreeMap<String, String>> = toml::from_str(&content)
            .map_err(|e| VaultError::File(format!("{}: {}", self.path.display(), e.message())))?;

        Ok(raw
            .into_iter()
            .map(|(name, versions)| {
                let versions = versions
                    .into_iter()
                    .map(|(version, value)| (version, SecretValue::new(value)))
                    .collect();
                (name, versions)
            })
            .collect())
    }
}

#[async_trait]
impl Vault for FileVault {
    async fn get_secret(&self, name: &str, version: Option<&str>) -> VaultResult<SecretValue> {
        let secrets = self.load().await?;
        let versions = secrets
            .get(name)
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))?;
        resolve(name, versions, version)
    }

    async fn list_versions(&self, name: &str) -> VaultResult<Vec<String>> {
        let secrets = self.load().await?;
        let mut versions: Vec<String> = secrets
            .get(name)
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))?
            .keys()
            .cloned()
            .collect();
        sort_versions(&mut versions);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildArgs;
    use ebb_types::{LayerTemplate, ResourceSpec};

    fn data_request() -> ApplyRequest {
        ApplyRequest::DataLayer {
            layer: "main".into(),
            template: LayerTemplate::new(vec![
                ResourceSpec::new(ResourceKind::Database, "app-db"),
                ResourceSpec::new(ResourceKind::Storage, "ebbassets"),
            ]),
        }
    }

    fn revision_request(workload: &str, image: &ImageRef) -> ApplyRequest {
        ApplyRequest::WorkloadRevision {
            workload: workload.into(),
            image: image.clone(),
            scale: ScaleConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_reserved_names_are_unavailable() {
        let cloud = SimulatedCloud::new(ArtifactRegistry::new());
        cloud.reserve_name(ResourceKind::Storage, "ebbassets");

        assert!(!cloud
            .name_available(ResourceKind::Storage, "ebbassets")
            .await
            .unwrap());
        assert!(cloud
            .name_available(ResourceKind::Database, "ebbassets")
            .await
            .unwrap());

        let err = cloud.create_or_update(&data_request()).await.unwrap_err();
        assert_eq!(
            err,
            CloudError::NameTaken {
                name: "ebbassets".into()
            }
        );
        assert!(cloud.snapshot().resources.is_empty());
    }

    #[tokio::test]
    async fn test_data_layer_resources_and_probe() {
        let cloud = SimulatedCloud::new(ArtifactRegistry::new());
        assert!(!cloud.probe("sim://data/main").await.is_healthy());

        let set = cloud.create_or_update(&data_request()).await.unwrap();
        assert_eq!(set.resources.len(), 2);
        for id in &set.resources {
            assert!(cloud.resource_exists(id).await.unwrap());
        }
        assert!(cloud.probe("sim://data/main").await.is_healthy());

        cloud.delete(&set).await.unwrap();
        assert!(!cloud.resource_exists(&set.resources[0]).await.unwrap());
        assert_eq!(cloud.mutating_calls(), 2);
    }

    #[tokio::test]
    async fn test_revision_routing() {
        let cloud = SimulatedCloud::new(ArtifactRegistry::new());
        let image = ImageRef::new("registry.local/web@sha256:01");

        let first = cloud.create_or_update(&revision_request("web", &image)).await.unwrap();
        let r1 = first.revision.clone().unwrap();
        assert!(cloud.probe(first.revision_url.as_deref().unwrap()).await.is_healthy());
        assert!(!cloud.probe("sim://web").await.is_healthy());

        cloud.activate_revision("web", &r1).await.unwrap();
        let second = cloud.create_or_update(&revision_request("web", &image)).await.unwrap();
        let r2 = second.revision.unwrap();
        cloud.activate_revision("web", &r2).await.unwrap();

        let revisions = cloud.list_revisions("web").await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions.iter().any(|r| r.id == r2 && r.serving));

        assert!(cloud.retire_revision("web", &r2).await.is_err());
        cloud.retire_revision("web", &r1).await.unwrap();
        assert_eq!(cloud.list_revisions("web").await.unwrap().len(), 1);
        assert!(matches!(
            cloud.activate_revision("web", &r1).await,
            Err(CloudError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_failures() {
        let cloud = SimulatedCloud::new(ArtifactRegistry::new());
        cloud.fail_next("create_or_update", CloudError::transient("create_or_update", "429"));

        assert!(cloud.create_or_update(&data_request()).await.is_err());
        assert!(cloud.create_or_update(&data_request()).await.is_ok());
        assert_eq!(cloud.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_cache_serves_previous_bundle() {
        let registry = ArtifactRegistry::new();
        let cloud = SimulatedCloud::new(registry.clone());
        let old = ImageRef::new("registry.local/web@sha256:01");
        let new = ImageRef::new("registry.local/web@sha256:02");
        registry.publish(old.clone(), "old".into());
        registry.publish(new.clone(), "new".into());

        for image in [&old, &new] {
            let set = cloud.create_or_update(&revision_request("web", image)).await.unwrap();
            cloud.activate_revision("web", &set.revision.unwrap()).await.unwrap();
        }

        cloud.serve_stale("web", Some(1));
        assert_eq!(cloud.fetch("sim://web/app.js").await.unwrap().body, "old");
        assert_eq!(cloud.fetch("sim://web/app.js").await.unwrap().body, "new");
    }

    #[tokio::test]
    async fn test_builder_is_content_addressed() {
        let registry = ArtifactRegistry::new();
        let builder = LocalBuilder::new("registry.local", registry.clone());
        let request = |value: &str| BuildRequest {
            workload: "web".into(),
            source_ref: "git:main".into(),
            args: BuildArgs::new().with("AUTH_CLIENT_ID", SecretValue::new(value)),
        };

        let a = builder.build(&request("aaaa")).await.unwrap();
        let b = builder.build(&request("aaaa")).await.unwrap();
        let c = builder.build(&request("bbbb")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("registry.local/web@sha256:"));
        assert!(registry.bundle(&c).unwrap().contains("bbbb"));
        assert_eq!(builder.builds(), 3);
    }

    #[tokio::test]
    async fn test_memory_vault_versions() {
        let vault = MemoryVault::new()
            .with_secret("auth-client-id", "2", "second")
            .with_secret("auth-client-id", "10", "tenth");

        assert_eq!(
            vault.list_versions("auth-client-id").await.unwrap(),
            vec!["2".to_string(), "10".to_string()]
        );
        assert_eq!(
            vault.get_secret("auth-client-id", None).await.unwrap().expose(),
            "tenth"
        );
        assert!(matches!(
            vault.get_secret("auth-client-id", Some("3")).await,
            Err(VaultError::VersionNotFound { .. })
        ));

        vault.fail_next(1);
        assert!(matches!(
            vault.get_secret("auth-client-id", None).await,
            Err(VaultError::Unavailable(_))
        ));
        assert!(vault.get_secret("auth-client-id", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_file_vault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        std::fs::write(&path, "[auth-client-id]\n\"1\" = \"one\"\n\"2\" = \"two\"\n").unwrap();

        let vault = FileVault::new(&path);
        assert_eq!(vault.get_secret("auth-client-id", None).await.unwrap().expose(), "two");
        assert_eq!(
            vault.get_secret("auth-client-id", Some("1")).await.unwrap().expose(),
            "one"
        );
        assert!(matches!(
            vault.get_secret("missing", None).await,
            Err(VaultError::SecretNotFound(_))
        ));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = SimulatedCloudState::default();
        state.reserved_names.insert("storage/taken".into());
        state.next_revision = 7;
        let json = serde_json::to_string(&state).unwrap();
        let back: SimulatedCloudState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
