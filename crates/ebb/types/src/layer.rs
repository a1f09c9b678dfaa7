//! Resource layers and their lifecycle state machine
//!
//! ```text
//! Absent -> Deploying -> Active -> Pausing -> Paused -> Resuming -> Active
//!              |                     |                     |
//!              +---------------------+----> Failed <-------+
//! ```
//!
//! `Absent`, `Active` and `Paused` are stable. Every other state except
//! `Failed` is transient and must resolve within a bounded timeout.

use crate::ids::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The two fixed planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Persistent resources that survive compute teardown
    Data,
    /// Stateless workloads, safely recreatable
    Compute,
}

impl LayerKind {
    /// The layer that must be `Active` before this one may become `Active`
    pub fn depends_on(self) -> Option<LayerKind> {
        match self {
            LayerKind::Data => None,
            LayerKind::Compute => Some(LayerKind::Data),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Data => write!(f, "data"),
            LayerKind::Compute => write!(f, "compute"),
        }
    }
}

/// Payload-free view of a [`LayerState`], used for transition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Absent,
    Deploying,
    Active,
    Pausing,
    Paused,
    Resuming,
    Decommissioning,
    Failed,
}

impl Phase {
    /// Transient phases must resolve to a stable phase or `Failed`
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Phase::Deploying | Phase::Pausing | Phase::Resuming | Phase::Decommissioning
        )
    }

    pub fn is_stable(self) -> bool {
        matches!(self, Phase::Absent | Phase::Active | Phase::Paused)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Absent => "Absent",
            Phase::Deploying => "Deploying",
            Phase::Active => "Active",
            Phase::Pausing => "Pausing",
            Phase::Paused => "Paused",
            Phase::Resuming => "Resuming",
            Phase::Decommissioning => "Decommissioning",
            Phase::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

/// Mutating operations on a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerOperation {
    Deploy,
    Pause,
    Resume,
    Decommission,
}

impl LayerOperation {
    /// The transient state held while the operation is in flight
    pub fn in_flight(self) -> LayerState {
        match self {
            LayerOperation::Deploy => LayerState::Deploying,
            LayerOperation::Pause => LayerState::Pausing,
            LayerOperation::Resume => LayerState::Resuming,
            LayerOperation::Decommission => LayerState::Decommissioning,
        }
    }

    /// The stable state reached on success
    pub fn target(self) -> LayerState {
        match self {
            LayerOperation::Deploy | LayerOperation::Resume => LayerState::Active,
            LayerOperation::Pause => LayerState::Paused,
            LayerOperation::Decommission => LayerState::Absent,
        }
    }

    /// Phase in which re-issuing the operation is a successful no-op
    pub fn converged_phase(self) -> Option<Phase> {
        match self {
            LayerOperation::Deploy => None,
            LayerOperation::Pause => Some(Phase::Paused),
            LayerOperation::Resume => Some(Phase::Active),
            LayerOperation::Decommission => Some(Phase::Absent),
        }
    }

    /// Phases from which the operation may start on a layer of `kind`
    pub fn allowed_from(self, kind: LayerKind) -> &'static [Phase] {
        match (self, kind) {
            (LayerOperation::Deploy, LayerKind::Data) => &[Phase::Absent, Phase::Failed],
            // Redeploying an active compute layer applies a new scale plan.
            (LayerOperation::Deploy, LayerKind::Compute) => {
                &[Phase::Absent, Phase::Failed, Phase::Active]
            }
            (LayerOperation::Pause, LayerKind::Compute) => &[Phase::Active, Phase::Failed],
            (LayerOperation::Resume, LayerKind::Compute) => {
                &[Phase::Paused, Phase::Absent, Phase::Failed]
            }
            (LayerOperation::Decommission, LayerKind::Data) => &[Phase::Active, Phase::Failed],
            (LayerOperation::Pause, LayerKind::Data)
            | (LayerOperation::Resume, LayerKind::Data)
            | (LayerOperation::Decommission, LayerKind::Compute) => &[],
        }
    }
}

impl fmt::Display for LayerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerOperation::Deploy => write!(f, "deploy"),
            LayerOperation::Pause => write!(f, "pause"),
            LayerOperation::Resume => write!(f, "resume"),
            LayerOperation::Decommission => write!(f, "decommission"),
        }
    }
}

/// Lifecycle state of a resource layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LayerState {
    Absent,
    Deploying,
    Active,
    Pausing,
    Paused,
    Resuming,
    Decommissioning,
    Failed {
        /// Operation that was in flight
        during: LayerOperation,
        /// Name of the failing check or step
        check: String,
        /// Failure detail
        reason: String,
    },
}

impl LayerState {
    pub fn failed(during: LayerOperation, check: impl Into<String>, reason: impl Into<String>) -> Self {
        LayerState::Failed {
            during,
            check: check.into(),
            reason: reason.into(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            LayerState::Absent => Phase::Absent,
            LayerState::Deploying => Phase::Deploying,
            LayerState::Active => Phase::Active,
            LayerState::Pausing => Phase::Pausing,
            LayerState::Paused => Phase::Paused,
            LayerState::Resuming => Phase::Resuming,
            LayerState::Decommissioning => Phase::Decommissioning,
            LayerState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.phase().is_transient()
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerState::Failed {
                during,
                check,
                reason,
            } => write!(f, "Failed ({} / {}: {})", during, check, reason),
            other => write!(f, "{}", other.phase()),
        }
    }
}

/// A requested operation is not valid from the layer's current phase
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot {operation} {kind} layer from {current}, expected one of: {expected:?}")]
pub struct InvalidTransition {
    pub kind: LayerKind,
    pub operation: LayerOperation,
    pub current: Phase,
    pub expected: Vec<Phase>,
}

/// One of the two planes and the resources it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLayer {
    /// Which plane this is
    pub kind: LayerKind,

    /// Configured layer name
    pub name: String,

    /// Owned resources, in creation order
    pub resources: Vec<ResourceId>,

    /// Current lifecycle state
    pub state: LayerState,

    /// When the current state was entered
    pub since: DateTime<Utc>,
}

impl ResourceLayer {
    pub fn new(kind: LayerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            resources: Vec::new(),
            state: LayerState::Absent,
            since: Utc::now(),
        }
    }

    pub fn depends_on(&self) -> Option<LayerKind> {
        self.kind.depends_on()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Check that `operation` may start from the current state
    pub fn check_begin(&self, operation: LayerOperation) -> Result<(), InvalidTransition> {
        let allowed = operation.allowed_from(self.kind);
        if allowed.contains(&self.phase()) {
            Ok(())
        } else {
            Err(InvalidTransition {
                kind: self.kind,
                operation,
                current: self.phase(),
                expected: allowed.to_vec(),
            })
        }
    }

    /// Enter a new state, stamping the entry time
    pub fn set_state(&mut self, state: LayerState) {
        self.state = state;
        self.since = Utc::now();
    }

    /// A transient state that outlived `timeout` (e.g. after a crash)
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.state.is_transient() && now - self.since > timeout
    }
}
