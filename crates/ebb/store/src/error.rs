//! Store errors

use ebb_types::{LayerKind, Phase};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The layer was not in one of the expected phases
    #[error("{kind} layer is {current}, expected one of: {allowed:?}")]
    TransitionRejected {
        kind: LayerKind,
        current: Phase,
        allowed: Vec<Phase>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
