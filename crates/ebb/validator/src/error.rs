//! Validator errors

use ebb_cloud::{CloudError, ProbeStatus, RetryError};
use ebb_types::{ResourceId, ResourceKind};
use thiserror::Error;

/// A pre-check failed; nothing was mutated
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("template declares no resources")]
    EmptyTemplate,

    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("resource name {name:?} is declared more than once")]
    DuplicateName { name: String },

    #[error("{kind} name {name:?} is already taken")]
    NameUnavailable { kind: ResourceKind, name: String },

    #[error("invalid scale for workload {workload}: {reason}")]
    InvalidScale { workload: String, reason: String },

    #[error("name availability query failed: {0}")]
    Query(RetryError<CloudError>),
}

impl ValidationError {
    /// Name of the failing check
    pub fn check(&self) -> &'static str {
        match self {
            ValidationError::EmptyTemplate
            | ValidationError::InvalidName { .. }
            | ValidationError::DuplicateName { .. }
            | ValidationError::InvalidScale { .. } => "template",
            ValidationError::NameUnavailable { .. } | ValidationError::Query(_) => {
                "name_uniqueness"
            }
        }
    }
}

/// A post-check failed after the mutation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PostCheckError {
    #[error("resource {0} does not exist after apply")]
    ResourceMissing(ResourceId),

    #[error("health probe {url} failed after {attempts} attempts: {last}")]
    Unhealthy {
        url: String,
        attempts: u32,
        last: ProbeStatus,
    },

    #[error("existence query failed: {0}")]
    Query(RetryError<CloudError>),
}

impl PostCheckError {
    /// Name of the failing check
    pub fn check(&self) -> &'static str {
        match self {
            PostCheckError::ResourceMissing(_) | PostCheckError::Query(_) => "resource_existence",
            PostCheckError::Unhealthy { .. } => "health_probe",
        }
    }
}
