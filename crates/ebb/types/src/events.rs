//! Event types for the unified observability stream

use crate::cost::BudgetAlert;
use crate::ids::{RevisionId, RotationId};
use crate::layer::{LayerKind, LayerOperation, Phase};
use crate::secret::Fingerprint;
use serde::{Deserialize, Serialize};

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EbbEventEnvelope {
    /// Unique event ID
    pub id: uuid::Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Component that emitted the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Correlation ID for tracing one operation across events
    pub correlation_id: Option<String>,

    /// The event payload
    pub event: EbbEvent,
}

/// Source component of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Controller,
    Validator,
    SecretPipeline,
    CostPolicy,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted while managing the two planes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EbbEvent {
    LayerTransitioned {
        layer: LayerKind,
        operation: LayerOperation,
        from: Phase,
        to: Phase,
    },

    LayerFailed {
        layer: LayerKind,
        operation: LayerOperation,
        check: String,
        reason: String,
    },

    /// A transient state outlived its timeout and was moved to Failed
    StaleTransientRecovered { layer: LayerKind, phase: Phase },

    RevisionActivated {
        workload: String,
        revision: RevisionId,
    },

    RevisionRetired {
        workload: String,
        revision: RevisionId,
    },

    RolledBack {
        workload: String,
        from: Option<RevisionId>,
        to: RevisionId,
    },

    RotationStarted {
        secret: String,
        rotation_id: RotationId,
        fingerprint: Fingerprint,
    },

    RotationVerified {
        secret: String,
        rotation_id: RotationId,
        attempts: u32,
    },

    VerificationTimedOut {
        secret: String,
        rotation_id: RotationId,
        workload: String,
        attempts: u32,
    },

    BudgetExceeded(BudgetAlert),
}
