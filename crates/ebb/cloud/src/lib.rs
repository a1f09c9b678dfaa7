//! # Ebb Cloud - External collaborator interfaces
//!
//! Everything Ebb does to the outside world goes through the narrow traits
//! defined here:
//!
//! - [`CloudControl`]: create/update/delete resources, manage revisions
//! - [`Vault`]: read secret values by name and version
//! - [`Builder`]: build a content-addressed image from source + build args
//! - [`HealthProbe`] / [`ArtifactProbe`]: probe live endpoints
//!
//! The cloud is treated as opaque, slow and possibly failing. Calls are wrapped
//! in [`retry::retry`], which retries transient failure classes with
//! exponential backoff and fails fast on permanent ones. Long waits use
//! [`retry::poll_until`]; both are bounded by attempt count and total timeout.
//!
//! ## Backends
//!
//! - [`simulated`]: deterministic in-memory cloud, vault and builder
//! - [`http`]: reqwest-backed health and artifact probes

#![deny(unsafe_code)]

pub mod build;
pub mod cloud;
pub mod error;
pub mod http;
pub mod probe;
pub mod retry;
pub mod simulated;
pub mod vault;

// Re-exports
pub use build::{BuildArgs, BuildRequest, Builder};
pub use cloud::{ApplyRequest, CloudControl, CloudRevision, ResourceSet};
pub use error::{CloudError, CloudResult, ProbeError, Transience, VaultError, VaultResult};
pub use http::HttpProbe;
pub use probe::{ArtifactProbe, HealthProbe, ProbeStatus, ServedArtifact};
pub use retry::{poll_until, retry, PollError, RetryError, RetryPolicy};
pub use simulated::{
    ArtifactRegistry, CloudCall, FileVault, LocalBuilder, MemoryVault, SimulatedCloud,
    SimulatedCloudState,
};
pub use vault::{SecretValue, Vault};
