//! CLI error types

use ebb_control::{ConfigError, ControlError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Controller refused or failed the operation
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local backend state could not be read or written
    #[error("Local state error: {0}")]
    LocalState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// 0 success, 1 validation or dependency, 2 deployment, 3 verification timeout
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Control(err) => err.exit_code(),
            CliError::Config(_) | CliError::InvalidInput(_) => 1,
            CliError::LocalState(_) | CliError::Io(_) | CliError::Json(_) | CliError::Yaml(_) => 2,
        }
    }
}

impl From<ebb_store::StoreError> for CliError {
    fn from(err: ebb_store::StoreError) -> Self {
        CliError::Control(ControlError::from(err))
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
