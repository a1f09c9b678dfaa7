//! Cost policy errors

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CostError {
    #[error("no compute tier handles {required} concurrent requests per replica (workload {workload})")]
    NoTierFits { workload: String, required: u32 },

    #[error("workload {workload} uses unknown tier {tier}")]
    UnknownTier { workload: String, tier: String },

    #[error("invalid traffic profile for workload {workload}: {reason}")]
    InvalidTraffic { workload: String, reason: String },

    #[error("tier catalog is empty")]
    EmptyCatalog,
}

pub type CostResult<T> = std::result::Result<T, CostError>;
