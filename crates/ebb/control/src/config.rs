//! Controller configuration
//!
//! Loaded from TOML. Every section has defaults, so a missing file or a
//! missing section yields a usable (if empty) configuration.

use ebb_cloud::RetryPolicy;
use ebb_costs::{ComputeTier, CostPolicy, TierCatalog};
use ebb_secrets::{PipelineSettings, SecretSpec, WorkloadSource};
use ebb_types::{ImageRef, LayerTemplate, TrafficProfile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("cannot parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("cannot find config directory")]
    NoConfigDir,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Names of the two layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerNames {
    pub data: String,
    pub compute: String,
}

impl Default for LayerNames {
    fn default() -> Self {
        Self {
            data: "main".to_string(),
            compute: "apps".to_string(),
        }
    }
}

/// Data plane declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Resources to create, in order
    #[serde(flatten)]
    pub template: LayerTemplate,

    /// Probed after apply; no connectivity probe when unset
    pub connectivity_url: Option<String>,
}

/// One compute workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,

    /// What the builder builds from
    pub source_ref: String,

    /// Prebuilt image used on first deploy instead of building
    #[serde(default)]
    pub image: Option<ImageRef>,

    /// Path of the served bundle scanned during secret verification
    #[serde(default = "default_bundle_path")]
    pub bundle_path: String,

    /// Overrides `health.path`
    #[serde(default)]
    pub health_path: Option<String>,

    #[serde(default)]
    pub traffic: TrafficProfile,
}

fn default_bundle_path() -> String {
    "/assets/app.js".to_string()
}

impl WorkloadConfig {
    pub fn new(name: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_ref: source_ref.into(),
            image: None,
            bundle_path: default_bundle_path(),
            health_path: None,
            traffic: TrafficProfile::default(),
        }
    }
}

/// Health probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Path appended to a revision's address
    pub path: String,

    /// Bounded window the probe is retried in
    pub window: RetryPolicy,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/healthz".to_string(),
            window: RetryPolicy {
                max_attempts: 10,
                initial_delay_ms: 1_000,
                max_delay_ms: 15_000,
                multiplier: 2.0,
                total_timeout_ms: 180_000,
            },
        }
    }
}

/// Secret verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub backoff: RetryPolicy,

    /// Wait before each verification attempt
    pub propagation_delay_ms: u64,

    /// Wait between verification and retiring previous revisions
    pub grace_period_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            backoff: RetryPolicy {
                max_attempts: 6,
                initial_delay_ms: 2_000,
                max_delay_ms: 30_000,
                multiplier: 2.0,
                total_timeout_ms: 300_000,
            },
            propagation_delay_ms: 5_000,
            grace_period_ms: 60_000,
        }
    }
}

/// State machine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// A transient state older than this is moved to Failed
    pub transient_timeout_secs: u64,

    /// Revisions kept per workload
    pub revision_history_limit: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            transient_timeout_secs: 900,
            revision_history_limit: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn transient_timeout(&self) -> chrono::Duration {
        i64::try_from(self.transient_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Full configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EbbConfig {
    pub layers: LayerNames,
    pub data: DataConfig,
    pub workloads: Vec<WorkloadConfig>,
    pub secrets: Vec<SecretSpec>,
    pub budget: CostPolicy,
    pub tiers: Vec<ComputeTier>,
    pub retry: RetryPolicy,
    pub health: HealthConfig,
    pub verification: VerificationConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for EbbConfig {
    fn default() -> Self {
        Self {
            layers: LayerNames::default(),
            data: DataConfig::default(),
            workloads: Vec::new(),
            secrets: Vec::new(),
            budget: CostPolicy::default(),
            tiers: TierCatalog::default_tiers(),
            retry: RetryPolicy::default(),
            health: HealthConfig::default(),
            verification: VerificationConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl EbbConfig {
    /// Load from `path`, or from the default location when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse { path, message },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: EbbConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/ebb/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("ebb").join("config.toml"))
    }

    /// Cross-section consistency checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for workload in &self.workloads {
            if !names.insert(workload.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "workload {} is declared more than once",
                    workload.name
                )));
            }
        }

        let mut secrets = BTreeSet::new();
        for secret in &self.secrets {
            if !secrets.insert(secret.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "secret {} is declared more than once",
                    secret.name
                )));
            }
            for consumer in &secret.consumers {
                if !names.contains(consumer.workload.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "secret {} is consumed by undeclared workload {}",
                        secret.name, consumer.workload
                    )));
                }
            }
        }

        if self.tiers.is_empty() {
            return Err(ConfigError::Invalid("tier catalog is empty".to_string()));
        }
        if self.layers.data.is_empty() || self.layers.compute.is_empty() {
            return Err(ConfigError::Invalid("layer names must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn workload(&self, name: &str) -> Option<&WorkloadConfig> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// Health URL of a revision or service at `base`
    pub fn health_url(&self, workload: &WorkloadConfig, base: &str) -> String {
        let path = workload.health_path.as_deref().unwrap_or(&self.health.path);
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn workload_sources(&self) -> BTreeMap<String, WorkloadSource> {
        self.workloads
            .iter()
            .map(|w| {
                (
                    w.name.clone(),
                    WorkloadSource {
                        source_ref: w.source_ref.clone(),
                        bundle_path: w.bundle_path.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            verification: self.verification.backoff.clone(),
            propagation_delay: Duration::from_millis(self.verification.propagation_delay_ms),
            grace_period: Duration::from_millis(self.verification.grace_period_ms),
            retry: self.retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[layers]
data = "main"
compute = "apps"

[data]
connectivity_url = "sim://data/main"

[[data.resources]]
kind = "database"
name = "app-db"

[[data.resources]]
kind = "storage"
name = "ebbassets"
params = { sku = "standard" }

[[workloads]]
name = "web"
source_ref = "git:main"

[workloads.traffic]
peak_concurrent_requests = 160
per_replica_concurrency = 80
idle_tolerant = true

[[secrets]]
name = "auth-client-id"
format = { type = "fixed_alphanumeric", length = 32 }
consumers = [{ workload = "web", env_var = "AUTH_CLIENT_ID" }]

[budget]
monthly_budget = 7500
alert_threshold_pct = 100

[verification]
propagation_delay_ms = 1000

[verification.backoff]
max_attempts = 3
"#;

    #[test]
    fn test_default_config() {
        let config = EbbConfig::default();
        assert_eq!(config.layers.data, "main");
        assert!(config.workloads.is_empty());
        assert_eq!(config.tiers.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_config() {
        let config = EbbConfig::load(Some(Path::new("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(config, EbbConfig::default());
    }

    #[test]
    fn test_parse_sample() {
        let config = EbbConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.data.template.resources.len(), 2);
        assert_eq!(config.data.template.resources[1].params["sku"], "standard");
        assert_eq!(config.workloads[0].bundle_path, "/assets/app.js");
        assert_eq!(config.workloads[0].traffic.peak_concurrent_requests, 160);
        assert_eq!(config.budget.monthly_budget, ebb_types::Usd::from_dollars(75));
        assert_eq!(config.verification.backoff.max_attempts, 3);
        // unset fields keep their defaults
        assert_eq!(config.verification.backoff.multiplier, 2.0);
        assert_eq!(config.verification.grace_period_ms, 60_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = EbbConfig::load(Some(&path)).unwrap();
        assert_eq!(config.secrets[0].name, "auth-client-id");

        std::fs::write(&path, "workloads = 3").unwrap();
        assert!(matches!(
            EbbConfig::load(Some(&path)),
            Err(ConfigError::Parse { path: p, .. }) if p == path
        ));
    }

    #[test]
    fn test_undeclared_consumer_rejected() {
        let doc = r#"
[[secrets]]
name = "api-key"
format = { type = "pattern", regex = "[A-Z]{8}" }
consumers = [{ workload = "ghost", env_var = "API_KEY" }]
"#;
        assert!(matches!(
            EbbConfig::from_toml(doc),
            Err(ConfigError::Invalid(message)) if message.contains("ghost")
        ));
    }

    #[test]
    fn test_huge_transient_timeout_saturates() {
        let lifecycle = LifecycleConfig {
            transient_timeout_secs: u64::MAX,
            ..LifecycleConfig::default()
        };
        assert_eq!(lifecycle.transient_timeout(), chrono::Duration::MAX);
        assert_eq!(
            LifecycleConfig::default().transient_timeout(),
            chrono::Duration::minutes(15)
        );
    }

    #[test]
    fn test_health_url() {
        let config = EbbConfig::default();
        let mut web = WorkloadConfig::new("web", "git:main");
        assert_eq!(config.health_url(&web, "sim://web/rev/web-00001"), "sim://web/rev/web-00001/healthz");

        web.health_path = Some("ready".into());
        assert_eq!(config.health_url(&web, "https://web.example/"), "https://web.example/ready");
    }
}
