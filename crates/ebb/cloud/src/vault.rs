//! Vault interface
//!
//! Values only ever leave the vault wrapped in [`SecretValue`], whose `Debug`
//! output is redacted so they cannot end up in logs by accident.

use crate::error::VaultResult;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// A secret value read from the vault
#[derive(Clone)]
pub struct SecretValue {
    inner: SecretString,
}

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: SecretString::from(value.into()),
        }
    }

    /// Exposes the raw value.
    ///
    /// The returned reference must not be logged, stored or serialized.
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Read access to an external secret vault
#[async_trait]
pub trait Vault: Send + Sync {
    /// Fetch a value; `None` resolves to the latest version
    async fn get_secret(&self, name: &str, version: Option<&str>) -> VaultResult<SecretValue>;

    /// Known versions of a secret, oldest first
    async fn list_versions(&self, name: &str) -> VaultResult<Vec<String>>;
}
