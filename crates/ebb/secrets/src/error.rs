//! Secret pipeline errors

use ebb_cloud::{CloudError, RetryError, VaultError};
use ebb_store::StoreError;
use ebb_types::{Phase, RotationId, SecretError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretsError {
    #[error("secret {0} is not declared")]
    UnknownSecret(String),

    #[error("secret {secret} has an invalid pattern: {message}")]
    InvalidPattern { secret: String, message: String },

    #[error("workload {0} has no declared build source")]
    NoSource(String),

    #[error("value for secret {secret} rejected: {reason}")]
    InvalidFormat { secret: String, reason: String },

    #[error("vault read for secret {secret} failed: {error}")]
    Vault {
        secret: String,
        error: RetryError<VaultError>,
    },

    #[error("vault has no versions of {0}")]
    NoVersions(String),

    /// Rotation needs a running compute layer to deploy into
    #[error("compute layer is {0}, rotation requires it to be Active")]
    ComputeNotActive(Phase),

    #[error("build of workload {workload} failed: {error}")]
    Build {
        workload: String,
        error: RetryError<CloudError>,
    },

    #[error("deploy of workload {workload} failed at {check}: {reason}")]
    Deploy {
        workload: String,
        check: String,
        reason: String,
    },

    /// The new revisions serve traffic but were not proven to carry the value
    #[error("rotation {rotation} of secret {secret} not verified on: {}", pending.join(", "))]
    VerificationTimeout {
        secret: String,
        rotation: RotationId,
        pending: Vec<String>,
    },

    #[error(transparent)]
    Record(#[from] SecretError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for the secret pipeline
pub type SecretsResult<T> = std::result::Result<T, SecretsError>;
