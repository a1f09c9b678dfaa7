//! Ebb Types - Resource model for two-plane deployments
//!
//! Ebb manages a **data plane** (database, secret store, durable storage) that
//! survives untouched, and a **compute plane** (stateless containers) that can
//! be paused to zero and rebuilt from the last known-good configuration.
//!
//! ## Key Concepts
//!
//! - **ResourceLayer**: One of the two planes, with its lifecycle [`LayerState`]
//! - **Workload**: A compute unit with a bounded revision history
//! - **Secret**: A vault-backed credential and its rotation history
//! - **CostBudget**: Projected monthly spend derived from workload scale configs
//! - **Events**: Unified observability stream
//!
//! This crate is pure data. Behaviour lives in the controller, the secret
//! pipeline, the validator and the cost policy crates.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cost;
pub mod events;
pub mod ids;
pub mod layer;
pub mod secret;
pub mod template;
pub mod workload;

// Re-export main types
pub use cost::{BudgetAlert, CostBudget, TrafficProfile, Usd};
pub use events::{EbbEvent, EbbEventEnvelope, EventSeverity, EventSource};
pub use ids::{ImageRef, ResourceId, RevisionId, RotationId};
pub use layer::{InvalidTransition, LayerKind, LayerOperation, LayerState, Phase, ResourceLayer};
pub use secret::{
    ConsumerTarget, Fingerprint, RotationRecord, Secret, SecretError, VaultRef, VaultRefError,
    VerificationOutcome, VerificationResult,
};
pub use template::{LayerTemplate, ResourceKind, ResourceSpec};
pub use workload::{Revision, RevisionStatus, ScaleConfig, Workload, WorkloadError};
