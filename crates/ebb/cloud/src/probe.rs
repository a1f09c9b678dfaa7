//! Probe interfaces for live endpoints

use crate::error::ProbeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    Healthy,

    /// The endpoint answered, but not with success
    Unhealthy { reason: String },

    /// The endpoint could not be reached at all
    Unreachable { reason: String },
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeStatus::Healthy)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Healthy => write!(f, "healthy"),
            ProbeStatus::Unhealthy { reason } => write!(f, "unhealthy: {}", reason),
            ProbeStatus::Unreachable { reason } => write!(f, "unreachable: {}", reason),
        }
    }
}

/// Application-level health check against a URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeStatus;
}

/// A bundle fetched from a live deployment
///
/// The body may carry injected configuration values, so `Debug` only shows
/// its length.
#[derive(Clone)]
pub struct ServedArtifact {
    pub url: String,
    pub status_code: u16,
    pub body: String,
}

impl fmt::Debug for ServedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServedArtifact")
            .field("url", &self.url)
            .field("status_code", &self.status_code)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Fetches the artifact a deployment actually serves
#[async_trait]
pub trait ArtifactProbe: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ServedArtifact, ProbeError>;
}
