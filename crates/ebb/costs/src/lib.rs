//! # Ebb Costs - Cost policy engine
//!
//! Derives per-workload scale configs from a monthly budget and each
//! workload's traffic profile, and projects the resulting spend:
//!
//! - CPU and memory come from the cheapest [`ComputeTier`] whose concurrency
//!   meets the workload's per-replica threshold
//! - `max_replicas` covers peak traffic, capped to bound worst-case cost
//! - `min_replicas` is 0 (scale-to-zero) for idle-tolerant workloads
//! - projected spend is the sum of tier rate x `max_replicas`; above the alert
//!   line a non-fatal [`BudgetAlert`](ebb_types::BudgetAlert) is raised
//!
//! The engine never touches resources. It only supplies the scale configs the
//! lifecycle controller deploys.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod tier;

pub use engine::{CostPlan, CostPolicy, CostPolicyEngine, WorkloadDemand, WorkloadPlan};
pub use error::{CostError, CostResult};
pub use tier::{ComputeTier, TierCatalog};
