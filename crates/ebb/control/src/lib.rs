//! Ebb Control - Lifecycle controller for the data and compute planes
//!
//! The controller is the only component that sequences layer operations. It
//! enforces the dependency between the planes (compute needs an Active data
//! layer), runs the validator's pre- and post-checks around every mutation,
//! sizes workloads through the cost policy engine and drives secret rotations
//! through the propagation pipeline.
//!
//! ## Key Components
//!
//! - **LifecycleController**: `deploy_data`, `deploy_compute`, `pause`,
//!   `resume`, `rotate_secret`, `status`, plus `rollback`, `prune`,
//!   `decommission_data` and `plan`
//! - **LifecycleControllerBuilder**: Wires configuration and backends
//! - **WorkloadDeployer**: Probe-before-traffic revision rollout
//! - **EventAggregator**: Unified event stream
//! - **EbbConfig**: TOML configuration
//!
//! ## Error classes
//!
//! Every [`ControlError`] maps to an [`ErrorClass`] and an exit code:
//! validation and dependency errors (1) never mutate anything, deployment
//! errors (2) may leave partial state recorded as Failed, and verification
//! timeouts (3) leave the new revision serving unproven.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod config;
pub mod controller;
pub mod deployer;
pub mod error;
pub mod events;
mod occupancy;
pub mod status;

pub use builder::LifecycleControllerBuilder;
pub use config::{
    ConfigError, DataConfig, EbbConfig, HealthConfig, LayerNames, LifecycleConfig,
    VerificationConfig, WorkloadConfig,
};
pub use controller::{ComputeReport, LifecycleController, Outcome, RollbackReport, RolledOut};
pub use deployer::WorkloadDeployer;
pub use error::{ControlError, ControlResult, ErrorClass};
pub use events::EventAggregator;
pub use status::{LayerStatus, RotationStatus, SecretStatus, StatusReport, WorkloadStatus};
