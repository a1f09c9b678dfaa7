//! # Ebb Secrets - Secret propagation pipeline
//!
//! Moves a credential from the vault into every consuming workload and proves
//! it landed. `rotate(name, vault_ref)` takes a vault reference, never a raw
//! value:
//!
//! 1. read the value and validate it against the secret's declared format;
//!    an invalid value is rejected before anything is built
//! 2. record the new fingerprint as unverified
//! 3. rebuild every consumer with the value injected at build time
//! 4. roll out each image as a new revision, keeping the previous one
//! 5. fetch the served bundle until the expected fingerprint shows up, with
//!    exponential backoff and a bounded budget
//! 6. on success mark the rotation verified and retire previous revisions
//!    after a grace period; on exhaustion leave the new revisions serving and
//!    return [`SecretsError::VerificationTimeout`]
//!
//! Rotations of the same secret are serialized by [`SecretLocks`]; different
//! secrets rotate concurrently.

#![deny(unsafe_code)]

pub mod deployer;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod lock;
pub mod pipeline;
pub mod verify;

pub use deployer::{DeployFailure, DeployedRevision, RevisionDeployer};
pub use error::{SecretsError, SecretsResult};
pub use fingerprint::{fingerprint, fingerprint_str};
pub use format::{CompiledFormat, SecretFormat};
pub use lock::SecretLocks;
pub use pipeline::{
    ConsumerReport, ConsumerSpec, PipelineBackends, PipelineSettings, RotationReport,
    SecretPipeline, SecretSpec, WorkloadSource,
};
pub use verify::{inspect, verify_served};
