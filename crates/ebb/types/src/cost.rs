//! Cost budget types
//!
//! [`CostBudget`] is derived, never authoritative: it is recomputed from the
//! current workload scale configs whenever it is needed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul};

/// US dollar amount in whole cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Usd(u64);

impl Usd {
    pub const ZERO: Usd = Usd(0);

    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub fn from_dollars(dollars: u64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    pub fn cents(self) -> u64 {
        self.0
    }

    /// An equal share of this amount among `parts`, rounded down
    pub fn split(self, parts: usize) -> Usd {
        match u64::try_from(parts) {
            Ok(0) | Err(_) => self,
            Ok(parts) => Usd(self.0 / parts),
        }
    }
}

impl Add for Usd {
    type Output = Usd;

    fn add(self, rhs: Usd) -> Usd {
        Usd(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u32> for Usd {
    type Output = Usd;

    fn mul(self, rhs: u32) -> Usd {
        Usd(self.0.saturating_mul(u64::from(rhs)))
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Usd>>(iter: I) -> Usd {
        iter.fold(Usd::ZERO, Add::add)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Monthly budget with its projected spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBudget {
    /// Monthly ceiling
    pub monthly_ceiling: Usd,

    /// Sum of tier rate x max replicas over all workloads
    pub current_projected: Usd,

    /// Alert when projected spend exceeds this percentage of the ceiling
    pub alert_threshold_pct: u32,
}

impl CostBudget {
    /// Spend above which an alert is raised
    pub fn alert_line(&self) -> Usd {
        let line = u128::from(self.monthly_ceiling.0) * u128::from(self.alert_threshold_pct) / 100;
        Usd(u64::try_from(line).unwrap_or(u64::MAX))
    }

    /// `current_projected > threshold% x ceiling`, compared exactly in cents
    pub fn exceeds_threshold(&self) -> bool {
        u128::from(self.current_projected.0) * 100
            > u128::from(self.monthly_ceiling.0) * u128::from(self.alert_threshold_pct)
    }

    pub fn alert(&self) -> Option<BudgetAlert> {
        self.exceeds_threshold().then(|| BudgetAlert {
            monthly_ceiling: self.monthly_ceiling,
            current_projected: self.current_projected,
            alert_threshold_pct: self.alert_threshold_pct,
        })
    }
}

/// Non-fatal policy alert: projected spend is over the alert line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub monthly_ceiling: Usd,
    pub current_projected: Usd,
    pub alert_threshold_pct: u32,
}

impl fmt::Display for BudgetAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projected {} exceeds {}% of monthly budget {}",
            self.current_projected, self.alert_threshold_pct, self.monthly_ceiling
        )
    }
}

/// Declared traffic for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficProfile {
    /// Peak concurrent requests across all replicas
    pub peak_concurrent_requests: u32,

    /// Concurrent requests one replica must handle
    pub per_replica_concurrency: u32,

    /// Whether cold starts are acceptable (enables scale-to-zero)
    pub idle_tolerant: bool,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            peak_concurrent_requests: 80,
            per_replica_concurrency: 80,
            idle_tolerant: true,
        }
    }
}
