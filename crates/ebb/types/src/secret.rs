//! Secrets, vault references and rotation history
//!
//! A secret never carries its raw value. Only a [`Fingerprint`] (non-reversible
//! hash) is recorded, and a consuming target is marked verified only after the
//! deployed artifact has been probed and found to carry the new fingerprint.

use crate::ids::{RevisionId, RotationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Non-reversible hash of a secret value (lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Reference to a secret value inside the vault: `name` or `name@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultRef {
    pub name: String,
    /// `None` resolves to the latest version
    pub version: Option<String>,
}

impl VaultRef {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, Some(version.into()))
    }
}

/// Malformed vault reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultRefError {
    #[error("vault reference is empty")]
    Empty,

    #[error("vault reference {0:?} has an empty name or version")]
    EmptyPart(String),

    #[error("vault reference {0:?} contains whitespace")]
    Whitespace(String),
}

impl FromStr for VaultRef {
    type Err = VaultRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VaultRefError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(VaultRefError::Whitespace(s.to_string()));
        }
        match s.split_once('@') {
            Some((name, version)) => {
                if name.is_empty() || version.is_empty() {
                    return Err(VaultRefError::EmptyPart(s.to_string()));
                }
                Ok(VaultRef::pinned(name, version))
            }
            None => Ok(VaultRef::new(s, None)),
        }
    }
}

impl fmt::Display for VaultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A workload environment variable fed by a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerTarget {
    /// Consuming workload
    pub workload: String,

    /// Environment variable / build arg the value is injected as
    pub env_var: String,

    /// Whether the live artifact was proven to carry the latest fingerprint
    pub verified: bool,

    /// Revision that was verified
    pub verified_revision: Option<RevisionId>,
}

impl ConsumerTarget {
    pub fn new(workload: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            env_var: env_var.into(),
            verified: false,
            verified_revision: None,
        }
    }
}

/// What a probe of a consumer's live artifact found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The expected fingerprint is served
    Verified,

    /// Only a previously rotated value is served (likely a cache)
    Stale { served: Fingerprint },

    /// Neither the expected nor a previous value is served
    Missing,

    /// The artifact could not be fetched
    Unreachable { reason: String },
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Verified => write!(f, "verified"),
            VerificationOutcome::Stale { served } => write!(f, "stale (serving {})", served),
            VerificationOutcome::Missing => write!(f, "missing"),
            VerificationOutcome::Unreachable { reason } => write!(f, "unreachable: {}", reason),
        }
    }
}

/// Last verification result for one consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
}

/// One entry in a secret's rotation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub id: RotationId,

    /// Vault reference the value came from (resolved version)
    pub vault_ref: VaultRef,

    pub timestamp: DateTime<Utc>,

    /// Fingerprint of the new value
    pub fingerprint: Fingerprint,

    /// True only once every consumer was verified
    pub verified: bool,

    /// Revision deployed per consuming workload
    pub revisions: BTreeMap<String, RevisionId>,

    /// Last verification result per consuming workload
    #[serde(default)]
    pub verification: BTreeMap<String, VerificationResult>,
}

/// Secret bookkeeping errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("rotation {rotation} not found on secret {secret}")]
    RotationNotFound { secret: String, rotation: RotationId },

    #[error("workload {workload} does not consume secret {secret}")]
    NotAConsumer { secret: String, workload: String },
}

/// A vault-backed credential and its rotation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// Logical name
    pub name: String,

    /// Latest vault reference rotated in
    pub vault_ref: VaultRef,

    /// Consuming workloads
    pub consumers: Vec<ConsumerTarget>,

    /// Fingerprint last proven to be live everywhere
    pub last_verified: Option<Fingerprint>,

    /// Rotation history, oldest first
    pub history: Vec<RotationRecord>,
}

impl Secret {
    pub fn new(name: impl Into<String>, vault_ref: VaultRef, consumers: Vec<ConsumerTarget>) -> Self {
        Self {
            name: name.into(),
            vault_ref,
            consumers,
            last_verified: None,
            history: Vec::new(),
        }
    }

    /// Start a rotation: append an unverified record and reset consumer flags
    pub fn begin_rotation(&mut self, id: RotationId, vault_ref: VaultRef, fingerprint: Fingerprint) {
        self.vault_ref = vault_ref.clone();
        for consumer in &mut self.consumers {
            consumer.verified = false;
            consumer.verified_revision = None;
        }
        self.history.push(RotationRecord {
            id,
            vault_ref,
            timestamp: Utc::now(),
            fingerprint,
            verified: false,
            revisions: BTreeMap::new(),
            verification: BTreeMap::new(),
        });
    }

    pub fn rotation(&self, id: &RotationId) -> Option<&RotationRecord> {
        self.history.iter().find(|r| &r.id == id)
    }

    fn rotation_mut(&mut self, id: &RotationId) -> Result<&mut RotationRecord, SecretError> {
        let secret = self.name.clone();
        self.history
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(SecretError::RotationNotFound {
                secret,
                rotation: *id,
            })
    }

    /// Record the revision deployed for a consumer during a rotation
    pub fn record_deployed(
        &mut self,
        id: &RotationId,
        workload: &str,
        revision: RevisionId,
    ) -> Result<(), SecretError> {
        self.rotation_mut(id)?
            .revisions
            .insert(workload.to_string(), revision);
        Ok(())
    }

    /// Record the latest verification result for a consumer
    pub fn record_verification(
        &mut self,
        id: &RotationId,
        workload: &str,
        outcome: VerificationOutcome,
        attempts: u32,
    ) -> Result<(), SecretError> {
        self.rotation_mut(id)?.verification.insert(
            workload.to_string(),
            VerificationResult {
                outcome,
                attempts,
                checked_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Most recent rotation, if any
    pub fn latest_rotation(&self) -> Option<&RotationRecord> {
        self.history.last()
    }

    /// Mark one consumer verified for the given revision
    pub fn mark_consumer_verified(
        &mut self,
        workload: &str,
        revision: RevisionId,
    ) -> Result<(), SecretError> {
        let consumer = self
            .consumers
            .iter_mut()
            .find(|c| c.workload == workload)
            .ok_or_else(|| SecretError::NotAConsumer {
                secret: self.name.clone(),
                workload: workload.to_string(),
            })?;
        consumer.verified = true;
        consumer.verified_revision = Some(revision);
        Ok(())
    }

    /// Whether every consumer carries the latest value
    pub fn all_consumers_verified(&self) -> bool {
        self.consumers.iter().all(|c| c.verified)
    }

    /// Close a rotation as verified; requires every consumer to be verified
    pub fn complete_rotation(&mut self, id: &RotationId) -> Result<bool, SecretError> {
        let all_verified = self.all_consumers_verified();
        let record = self.rotation_mut(id)?;
        record.verified = all_verified;
        let fingerprint = record.fingerprint.clone();
        if all_verified {
            self.last_verified = Some(fingerprint);
        }
        Ok(all_verified)
    }

    /// Fingerprints of earlier rotations, newest first
    pub fn previous_fingerprints(&self, current: &RotationId) -> Vec<Fingerprint> {
        self.history
            .iter()
            .rev()
            .filter(|r| &r.id != current)
            .map(|r| r.fingerprint.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        Secret::new(
            "auth-client-id",
            VaultRef::new("auth-client-id", None),
            vec![
                ConsumerTarget::new("web", "AUTH_CLIENT_ID"),
                ConsumerTarget::new("api", "AUTH_CLIENT_ID"),
            ],
        )
    }

    #[test]
    fn test_vault_ref_parsing() {
        let pinned: VaultRef = "auth-client-id@3".parse().unwrap();
        assert_eq!(pinned, VaultRef::pinned("auth-client-id", "3"));
        assert_eq!(pinned.to_string(), "auth-client-id@3");

        let latest: VaultRef = "auth-client-id".parse().unwrap();
        assert_eq!(latest.version, None);

        assert_eq!("".parse::<VaultRef>(), Err(VaultRefError::Empty));
        assert!(matches!("name@".parse::<VaultRef>(), Err(VaultRefError::EmptyPart(_))));
        assert!(matches!("a b".parse::<VaultRef>(), Err(VaultRefError::Whitespace(_))));
    }

    #[test]
    fn test_rotation_verified_only_when_all_consumers_verified() {
        let mut secret = secret();
        let id = RotationId::generate();
        secret.begin_rotation(id, VaultRef::pinned("auth-client-id", "3"), Fingerprint::from_hex("aa"));

        secret.mark_consumer_verified("web", RevisionId::new("web-2")).unwrap();
        assert!(!secret.complete_rotation(&id).unwrap());
        assert!(!secret.rotation(&id).unwrap().verified);
        assert!(secret.last_verified.is_none());

        secret.mark_consumer_verified("api", RevisionId::new("api-2")).unwrap();
        assert!(secret.complete_rotation(&id).unwrap());
        assert!(secret.rotation(&id).unwrap().verified);
        assert_eq!(secret.last_verified, Some(Fingerprint::from_hex("aa")));
    }

    #[test]
    fn test_new_rotation_resets_consumers() {
        let mut secret = secret();
        let first = RotationId::generate();
        secret.begin_rotation(first, VaultRef::pinned("auth-client-id", "1"), Fingerprint::from_hex("01"));
        secret.mark_consumer_verified("web", RevisionId::new("web-1")).unwrap();

        let second = RotationId::generate();
        secret.begin_rotation(second, VaultRef::pinned("auth-client-id", "2"), Fingerprint::from_hex("02"));
        assert!(secret.consumers.iter().all(|c| !c.verified));
        assert_eq!(secret.previous_fingerprints(&second), vec![Fingerprint::from_hex("01")]);
    }

    #[test]
    fn test_verification_results_are_kept_per_consumer() {
        let mut secret = secret();
        let id = RotationId::generate();
        secret.begin_rotation(id, VaultRef::pinned("auth-client-id", "3"), Fingerprint::from_hex("aa"));
        secret
            .record_verification(&id, "web", VerificationOutcome::Missing, 5)
            .unwrap();

        let record = secret.latest_rotation().unwrap();
        assert_eq!(record.verification["web"].attempts, 5);
        assert!(!record.verification["web"].outcome.is_verified());

        let json = serde_json::to_value(&record.verification["web"].outcome).unwrap();
        assert_eq!(json["outcome"], "missing");
    }

    #[test]
    fn test_unknown_consumer() {
        let mut secret = secret();
        let err = secret
            .mark_consumer_verified("worker", RevisionId::new("w-1"))
            .unwrap_err();
        assert!(matches!(err, SecretError::NotAConsumer { .. }));
    }
}
