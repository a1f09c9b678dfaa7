//! Compute tier catalog

use crate::error::{CostError, CostResult};
use ebb_types::Usd;
use serde::{Deserialize, Serialize};

/// A purchasable replica size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeTier {
    pub name: String,
    pub cpu_millis: u32,
    pub memory_mib: u32,
    /// Concurrent requests one replica of this tier handles
    pub max_concurrency: u32,
    /// Monthly cost of one replica running all month
    pub monthly_rate: Usd,
}

/// Tiers ordered cheapest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCatalog {
    tiers: Vec<ComputeTier>,
}

impl TierCatalog {
    pub fn new(mut tiers: Vec<ComputeTier>) -> CostResult<Self> {
        if tiers.is_empty() {
            return Err(CostError::EmptyCatalog);
        }
        tiers.sort_by(|a, b| {
            a.monthly_rate
                .cmp(&b.monthly_rate)
                .then(b.max_concurrency.cmp(&a.max_concurrency))
        });
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[ComputeTier] {
        &self.tiers
    }

    pub fn get(&self, name: &str) -> Option<&ComputeTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    /// Cheapest tier whose concurrency meets `per_replica`
    pub fn smallest_fitting(&self, per_replica: u32) -> Option<&ComputeTier> {
        self.tiers.iter().find(|t| t.max_concurrency >= per_replica)
    }

    /// The catalog used when none is configured
    pub fn default_tiers() -> Vec<ComputeTier> {
        vec![
            ComputeTier {
                name: "micro".to_string(),
                cpu_millis: 250,
                memory_mib: 256,
                max_concurrency: 20,
                monthly_rate: Usd::from_dollars(10),
            },
            ComputeTier {
                name: "small".to_string(),
                cpu_millis: 500,
                memory_mib: 512,
                max_concurrency: 40,
                monthly_rate: Usd::from_dollars(20),
            },
            ComputeTier {
                name: "standard".to_string(),
                cpu_millis: 1000,
                memory_mib: 1024,
                max_concurrency: 80,
                monthly_rate: Usd::from_dollars(40),
            },
            ComputeTier {
                name: "large".to_string(),
                cpu_millis: 2000,
                memory_mib: 2048,
                max_concurrency: 160,
                monthly_rate: Usd::from_dollars(80),
            },
        ]
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        let mut tiers = Self::default_tiers();
        tiers.sort_by_key(|t| t.monthly_rate);
        Self { tiers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_fitting_tier() {
        let catalog = TierCatalog::default();
        assert_eq!(catalog.smallest_fitting(1).unwrap().name, "micro");
        assert_eq!(catalog.smallest_fitting(80).unwrap().name, "standard");
        assert_eq!(catalog.smallest_fitting(81).unwrap().name, "large");
        assert!(catalog.smallest_fitting(161).is_none());
    }

    #[test]
    fn test_catalog_is_sorted_by_rate() {
        let catalog = TierCatalog::new(vec![
            ComputeTier {
                name: "big".into(),
                cpu_millis: 2000,
                memory_mib: 4096,
                max_concurrency: 200,
                monthly_rate: Usd::from_dollars(90),
            },
            ComputeTier {
                name: "tiny".into(),
                cpu_millis: 100,
                memory_mib: 128,
                max_concurrency: 10,
                monthly_rate: Usd::from_dollars(5),
            },
        ])
        .unwrap();
        assert_eq!(catalog.tiers()[0].name, "tiny");
        assert_eq!(TierCatalog::new(vec![]), Err(CostError::EmptyCatalog));
    }
}
