//! Controller errors and their exit-code classes

use crate::config::ConfigError;
use ebb_costs::CostError;
use ebb_secrets::SecretsError;
use ebb_store::StoreError;
use ebb_types::{InvalidTransition, LayerKind, Phase, RotationId, WorkloadError};
use ebb_validator::ValidationError;
use std::fmt;
use thiserror::Error;

/// Error taxonomy as seen by operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or invalid state; nothing was mutated
    Validation,
    /// A prerequisite layer is not Active; nothing was mutated
    Dependency,
    /// A mutation or post-check failed; partial state possible
    Deployment,
    /// New revision serves traffic but was not proven correct
    VerificationTimeout,
}

impl ErrorClass {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Validation | ErrorClass::Dependency => 1,
            ErrorClass::Deployment => 2,
            ErrorClass::VerificationTimeout => 3,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Validation => "validation error",
            ErrorClass::Dependency => "dependency error",
            ErrorClass::Deployment => "deployment error",
            ErrorClass::VerificationTimeout => "verification timeout",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle controller error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation not valid from the layer's current phase
    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    /// The layer this one depends on is not Active
    #[error("{layer} layer requires {requires} layer to be Active, but it is {current}")]
    Dependency {
        layer: LayerKind,
        requires: LayerKind,
        current: Phase,
    },

    #[error("pre-check {} failed: {}", .0.check(), .0)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cost(#[from] CostError),

    /// Operation needs the layer to be Active
    #[error("{layer} layer must be Active, but it is {current}")]
    NotActive { layer: LayerKind, current: Phase },

    #[error("compute layer must be Absent or Paused before decommissioning data, but it is {0}")]
    ComputeRunning(Phase),

    /// A compute operation was refused because rotations are rolling out revisions
    #[error("{operation} rejected: secret rotation in flight ({})", secrets.join(", "))]
    RotationInFlight {
        operation: &'static str,
        secrets: Vec<String>,
    },

    /// A rotation was refused because a compute layer operation holds the layer
    #[error("rotation of {0} rejected: a compute layer operation is in flight")]
    ComputeBusy(String),

    #[error("controller backend not configured: {0}")]
    MissingBackend(&'static str),

    #[error("workload {0} is not declared")]
    UnknownWorkload(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error("decommissioning the data layer is irreversible and needs explicit confirmation")]
    NotConfirmed,

    /// A mutating step failed; the layer was moved to Failed
    #[error("{layer} layer failed at {check}: {reason}")]
    Deployment {
        layer: LayerKind,
        check: String,
        reason: String,
    },

    #[error(transparent)]
    Secrets(SecretsError),

    #[error("rotation {rotation} of secret {secret} not verified on: {}", pending.join(", "))]
    VerificationTimeout {
        secret: String,
        rotation: RotationId,
        pending: Vec<String>,
    },

    #[error("state store: {0}")]
    Store(StoreError),
}

impl ControlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::Config(_)
            | ControlError::InvalidState(_)
            | ControlError::Validation(_)
            | ControlError::Cost(_)
            | ControlError::UnknownWorkload(_)
            | ControlError::Workload(_)
            | ControlError::NotConfirmed
            | ControlError::NotActive { .. }
            | ControlError::ComputeRunning(_)
            | ControlError::RotationInFlight { .. }
            | ControlError::ComputeBusy(_)
            | ControlError::MissingBackend(_) => ErrorClass::Validation,
            ControlError::Dependency { .. } => ErrorClass::Dependency,
            ControlError::Deployment { .. } | ControlError::Store(_) => ErrorClass::Deployment,
            ControlError::VerificationTimeout { .. } => ErrorClass::VerificationTimeout,
            ControlError::Secrets(error) => match error {
                SecretsError::UnknownSecret(_)
                | SecretsError::InvalidPattern { .. }
                | SecretsError::NoSource(_)
                | SecretsError::InvalidFormat { .. }
                | SecretsError::Vault { .. }
                | SecretsError::NoVersions(_) => ErrorClass::Validation,
                SecretsError::ComputeNotActive(_) => ErrorClass::Dependency,
                SecretsError::VerificationTimeout { .. } => ErrorClass::VerificationTimeout,
                SecretsError::Build { .. }
                | SecretsError::Deploy { .. }
                | SecretsError::Record(_)
                | SecretsError::Store(_) => ErrorClass::Deployment,
            },
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// Whether the failure happened before anything was mutated
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Validation | ErrorClass::Dependency
        )
    }

    pub(crate) fn deployment(layer: LayerKind, check: impl Into<String>, reason: impl fmt::Display) -> Self {
        ControlError::Deployment {
            layer,
            check: check.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError> for ControlError {
    fn from(error: StoreError) -> Self {
        ControlError::Store(error)
    }
}

impl From<SecretsError> for ControlError {
    fn from(error: SecretsError) -> Self {
        match error {
            SecretsError::VerificationTimeout {
                secret,
                rotation,
                pending,
            } => ControlError::VerificationTimeout {
                secret,
                rotation,
                pending,
            },
            other => ControlError::Secrets(other),
        }
    }
}

/// Result type for controller operations
pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_types::ResourceKind;

    #[test]
    fn test_exit_codes() {
        let validation = ControlError::Validation(ValidationError::NameUnavailable {
            kind: ResourceKind::Storage,
            name: "ebbassets".into(),
        });
        assert_eq!(validation.exit_code(), 1);
        assert!(validation.to_string().contains("name_uniqueness"));

        let dependency = ControlError::Dependency {
            layer: LayerKind::Compute,
            requires: LayerKind::Data,
            current: Phase::Absent,
        };
        assert_eq!(dependency.class(), ErrorClass::Dependency);
        assert_eq!(dependency.exit_code(), 1);

        let deployment = ControlError::deployment(LayerKind::Data, "health_probe", "503");
        assert_eq!(deployment.exit_code(), 2);
        assert!(!deployment.is_pre_mutation());

        let timeout: ControlError = SecretsError::VerificationTimeout {
            secret: "auth-client-id".into(),
            rotation: RotationId::generate(),
            pending: vec!["web".into()],
        }
        .into();
        assert_eq!(timeout.exit_code(), 3);
    }

    #[test]
    fn test_invalid_secret_value_is_validation() {
        let err: ControlError = SecretsError::InvalidFormat {
            secret: "auth-client-id".into(),
            reason: "expected 32 characters, got 31".into(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_overlap_rejections_are_pre_mutation() {
        let busy = ControlError::RotationInFlight {
            operation: "pause",
            secrets: vec!["auth-client-id".into()],
        };
        assert_eq!(busy.exit_code(), 1);
        assert!(busy.is_pre_mutation());
        assert!(busy.to_string().contains("auth-client-id"));

        assert!(ControlError::ComputeBusy("auth-client-id".into()).is_pre_mutation());
    }
}
