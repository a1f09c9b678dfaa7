//! Error types for external collaborators

use thiserror::Error;

/// Whether a failure is worth retrying
pub trait Transience {
    fn is_transient(&self) -> bool;
}

/// Cloud control and build errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// Throttling, timeouts, 5xx: worth retrying
    #[error("transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Rejected request: retrying cannot help
    #[error("permanent failure during {operation}: {message}")]
    Permanent { operation: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("name {name} is already taken")]
    NameTaken { name: String },
}

impl CloudError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl Transience for CloudError {
    fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient { .. })
    }
}

/// Result type for cloud and build operations
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Vault errors
///
/// Messages never include secret values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("secret {0} not found in vault")]
    SecretNotFound(String),

    #[error("version {version} of secret {name} not found in vault")]
    VersionNotFound { name: String, version: String },

    #[error("vault unavailable: {0}")]
    Unavailable(String),

    #[error("vault access denied: {0}")]
    AccessDenied(String),

    #[error("vault file error: {0}")]
    File(String),
}

impl Transience for VaultError {
    fn is_transient(&self) -> bool {
        matches!(self, VaultError::Unavailable(_))
    }
}

/// Result type for vault operations
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Probe transport errors (the endpoint could not be asked at all)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("endpoint {url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("invalid probe url {0}")]
    InvalidUrl(String),

    #[error("http client error: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classes() {
        assert!(CloudError::transient("create", "429").is_transient());
        assert!(!CloudError::permanent("create", "400").is_transient());
        assert!(!CloudError::Auth("expired token".into()).is_transient());
        assert!(VaultError::Unavailable("503".into()).is_transient());
        assert!(!VaultError::SecretNotFound("db-password".into()).is_transient());
    }
}
