//! Scale planning and budget projection

use crate::error::{CostError, CostResult};
use crate::tier::{ComputeTier, TierCatalog};
use ebb_types::{BudgetAlert, CostBudget, ScaleConfig, TrafficProfile, Usd, Workload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Declared cost target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostPolicy {
    /// Monthly ceiling
    pub monthly_budget: Usd,

    /// Alert when projected spend exceeds this percentage of the ceiling
    pub alert_threshold_pct: u32,

    /// Upper bound on `max_replicas` for any workload
    pub max_replicas_cap: u32,

    /// `min_replicas` for workloads that cannot tolerate cold starts
    pub min_replicas_when_busy: u32,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            monthly_budget: Usd::from_dollars(100),
            alert_threshold_pct: 80,
            max_replicas_cap: 10,
            min_replicas_when_busy: 1,
        }
    }
}

/// One workload's traffic, as input to planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDemand {
    pub name: String,
    pub traffic: TrafficProfile,
}

impl WorkloadDemand {
    pub fn new(name: impl Into<String>, traffic: TrafficProfile) -> Self {
        Self {
            name: name.into(),
            traffic,
        }
    }
}

/// Planned scale for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadPlan {
    pub workload: String,
    pub scale: ScaleConfig,
    /// Tier rate x `max_replicas`
    pub monthly_cost: Usd,
}

/// Output of [`CostPolicyEngine::plan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostPlan {
    pub workloads: Vec<WorkloadPlan>,
    pub budget: CostBudget,
    pub alert: Option<BudgetAlert>,
}

impl CostPlan {
    pub fn scale_for(&self, workload: &str) -> Option<&ScaleConfig> {
        self.workloads
            .iter()
            .find(|p| p.workload == workload)
            .map(|p| &p.scale)
    }
}

/// Derives scale configs and projected spend; never touches resources
#[derive(Debug, Clone)]
pub struct CostPolicyEngine {
    policy: CostPolicy,
    catalog: TierCatalog,
}

impl CostPolicyEngine {
    pub fn new(policy: CostPolicy, catalog: TierCatalog) -> Self {
        Self { policy, catalog }
    }

    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// Size one workload as if it had the whole monthly budget to itself
    pub fn size(&self, demand: &WorkloadDemand) -> CostResult<(ScaleConfig, &ComputeTier)> {
        self.size_within(demand, self.policy.monthly_budget)
    }

    /// Size one workload: smallest fitting tier, replicas covering peak
    ///
    /// `max_replicas` is bounded by `max_replicas_cap` and by how many replicas
    /// of the tier `share` pays for, but never drops below 1.
    pub fn size_within(
        &self,
        demand: &WorkloadDemand,
        share: Usd,
    ) -> CostResult<(ScaleConfig, &ComputeTier)> {
        let traffic = &demand.traffic;
        if traffic.per_replica_concurrency == 0 {
            return Err(CostError::InvalidTraffic {
                workload: demand.name.clone(),
                reason: "per_replica_concurrency must be at least 1".to_string(),
            });
        }

        let tier = self
            .catalog
            .smallest_fitting(traffic.per_replica_concurrency)
            .ok_or_else(|| CostError::NoTierFits {
                workload: demand.name.clone(),
                required: traffic.per_replica_concurrency,
            })?;

        let static_cap = self.policy.max_replicas_cap.max(1);
        let affordable = affordable_replicas(share, tier.monthly_rate);
        let cap = static_cap.min(affordable).max(1);
        let needed = traffic
            .peak_concurrent_requests
            .div_ceil(traffic.per_replica_concurrency);
        let max_replicas = needed.clamp(1, cap);
        let min_replicas = if traffic.idle_tolerant {
            0
        } else {
            self.policy.min_replicas_when_busy.min(max_replicas)
        };

        if needed > cap {
            if affordable < static_cap {
                info!(
                    workload = %demand.name,
                    needed,
                    affordable,
                    share = %share,
                    "Replica count capped by budget"
                );
            } else {
                debug!(
                    workload = %demand.name,
                    needed,
                    cap,
                    "Replica count capped by cost policy"
                );
            }
        }

        let scale = ScaleConfig {
            min_replicas,
            max_replicas,
            cpu_millis: tier.cpu_millis,
            memory_mib: tier.memory_mib,
            tier: tier.name.clone(),
        };
        Ok((scale, tier))
    }

    /// Plan scale configs for every workload and project the budget
    ///
    /// Each workload is sized within an equal share of the monthly budget.
    pub fn plan(&self, demands: &[WorkloadDemand]) -> CostResult<CostPlan> {
        let share = self.policy.monthly_budget.split(demands.len());
        let mut workloads = Vec::with_capacity(demands.len());
        for demand in demands {
            let (scale, tier) = self.size_within(demand, share)?;
            let monthly_cost = tier.monthly_rate * scale.max_replicas;
            debug!(
                workload = %demand.name,
                tier = %tier.name,
                max_replicas = scale.max_replicas,
                min_replicas = scale.min_replicas,
                cost = %monthly_cost,
                "Planned workload scale"
            );
            workloads.push(WorkloadPlan {
                workload: demand.name.clone(),
                scale,
                monthly_cost,
            });
        }

        let budget = self.budget(workloads.iter().map(|p| p.monthly_cost).sum());
        let alert = self.check(&budget);
        Ok(CostPlan {
            workloads,
            budget,
            alert,
        })
    }

    /// Recompute projected spend from the scale configs workloads currently carry
    pub fn project(&self, workloads: &[Workload]) -> CostResult<CostBudget> {
        let mut projected = Usd::ZERO;
        for workload in workloads {
            let tier = self
                .catalog
                .get(&workload.scale.tier)
                .ok_or_else(|| CostError::UnknownTier {
                    workload: workload.name.clone(),
                    tier: workload.scale.tier.clone(),
                })?;
            projected = projected + tier.monthly_rate * workload.scale.max_replicas;
        }
        Ok(self.budget(projected))
    }

    /// The alert for `budget`, if any; logged, never an error
    pub fn check(&self, budget: &CostBudget) -> Option<BudgetAlert> {
        let alert = budget.alert();
        if let Some(alert) = &alert {
            warn!(
                projected = %alert.current_projected,
                ceiling = %alert.monthly_ceiling,
                threshold_pct = alert.alert_threshold_pct,
                "Projected spend exceeds budget alert threshold"
            );
        }
        alert
    }

    fn budget(&self, projected: Usd) -> CostBudget {
        CostBudget {
            monthly_ceiling: self.policy.monthly_budget,
            current_projected: projected,
            alert_threshold_pct: self.policy.alert_threshold_pct,
        }
    }
}

/// Replicas of a tier at `rate` that `share` pays for; a free tier is unbounded
fn affordable_replicas(share: Usd, rate: Usd) -> u32 {
    if rate == Usd::ZERO {
        return u32::MAX;
    }
    u32::try_from(share.cents() / rate.cents()).unwrap_or(u32::MAX)
}

impl Default for CostPolicyEngine {
    fn default() -> Self {
        Self::new(CostPolicy::default(), TierCatalog::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebb_types::ImageRef;
    use proptest::prelude::*;

    fn engine(budget: u64, threshold: u32) -> CostPolicyEngine {
        CostPolicyEngine::new(
            CostPolicy {
                monthly_budget: Usd::from_dollars(budget),
                alert_threshold_pct: threshold,
                ..CostPolicy::default()
            },
            TierCatalog::default(),
        )
    }

    #[test]
    fn test_two_workloads_over_budget() {
        let engine = engine(75, 100);
        let plan = engine
            .plan(&[
                WorkloadDemand::new("web", TrafficProfile::default()),
                WorkloadDemand::new("api", TrafficProfile::default()),
            ])
            .unwrap();

        assert!(plan.workloads.iter().all(|p| p.monthly_cost == Usd::from_dollars(40)));
        assert_eq!(plan.budget.current_projected, Usd::from_dollars(80));
        let alert = plan.alert.expect("80 > 75 x 100%");
        assert_eq!(alert.current_projected, Usd::from_dollars(80));
    }

    #[test]
    fn test_within_budget_no_alert() {
        let plan = engine(200, 80)
            .plan(&[WorkloadDemand::new("web", TrafficProfile::default())])
            .unwrap();
        assert!(plan.alert.is_none());
    }

    #[test]
    fn test_scale_to_zero_only_when_idle_tolerant() {
        let engine = engine(100, 80);
        let (idle, _) = engine
            .size(&WorkloadDemand::new("web", TrafficProfile::default()))
            .unwrap();
        assert_eq!(idle.min_replicas, 0);

        let busy = TrafficProfile {
            idle_tolerant: false,
            ..TrafficProfile::default()
        };
        let (busy, _) = engine.size(&WorkloadDemand::new("api", busy)).unwrap();
        assert_eq!(busy.min_replicas, 1);
    }

    #[test]
    fn test_replicas_capped() {
        let traffic = TrafficProfile {
            peak_concurrent_requests: 10_000,
            per_replica_concurrency: 20,
            idle_tolerant: true,
        };
        let engine = engine(100, 80);
        let (scale, tier) = engine
            .size(&WorkloadDemand::new("web", traffic))
            .unwrap();
        assert_eq!(tier.name, "micro");
        assert_eq!(scale.max_replicas, 10);
    }

    #[test]
    fn test_budget_caps_replicas() {
        let traffic = TrafficProfile {
            peak_concurrent_requests: 10_000,
            per_replica_concurrency: 20,
            idle_tolerant: true,
        };
        // $50 split over two workloads pays for two $10 micro replicas each
        let plan = engine(50, 80)
            .plan(&[
                WorkloadDemand::new("web", traffic.clone()),
                WorkloadDemand::new("api", traffic),
            ])
            .unwrap();
        assert!(plan.workloads.iter().all(|p| p.scale.max_replicas == 2));
        assert_eq!(plan.budget.current_projected, Usd::from_dollars(40));
        assert!(plan.alert.is_none());
    }

    #[test]
    fn test_no_tier_fits() {
        let traffic = TrafficProfile {
            per_replica_concurrency: 500,
            ..TrafficProfile::default()
        };
        let err = engine(100, 80)
            .plan(&[WorkloadDemand::new("web", traffic)])
            .unwrap_err();
        assert_eq!(
            err,
            CostError::NoTierFits {
                workload: "web".into(),
                required: 500
            }
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let traffic = TrafficProfile {
            per_replica_concurrency: 0,
            ..TrafficProfile::default()
        };
        assert!(matches!(
            engine(100, 80).size(&WorkloadDemand::new("web", traffic)),
            Err(CostError::InvalidTraffic { .. })
        ));
    }

    #[test]
    fn test_project_from_workloads() {
        let engine = engine(75, 100);
        let plan = engine
            .plan(&[WorkloadDemand::new("web", TrafficProfile::default())])
            .unwrap();
        let workload = Workload::new(
            "web",
            ImageRef::new("registry.local/web"),
            plan.scale_for("web").unwrap().clone(),
        );
        let budget = engine.project(&[workload.clone(), workload]).unwrap();
        assert_eq!(budget.current_projected, Usd::from_dollars(80));

        let unknown = Workload::new(
            "odd",
            ImageRef::new("registry.local/odd"),
            ScaleConfig {
                tier: "gpu".into(),
                ..ScaleConfig::default()
            },
        );
        assert!(matches!(
            engine.project(&[unknown]),
            Err(CostError::UnknownTier { .. })
        ));
    }

    fn traffic() -> impl Strategy<Value = TrafficProfile> {
        (0u32..5_000, 1u32..=160, any::<bool>()).prop_map(|(peak, per, idle)| TrafficProfile {
            peak_concurrent_requests: peak,
            per_replica_concurrency: per,
            idle_tolerant: idle,
        })
    }

    proptest! {
        #[test]
        fn prop_replica_bounds(traffic in traffic(), cap in 1u32..50, busy_min in 0u32..5) {
            let engine = CostPolicyEngine::new(
                CostPolicy {
                    monthly_budget: Usd::from_dollars(1_000_000),
                    max_replicas_cap: cap,
                    min_replicas_when_busy: busy_min,
                    ..CostPolicy::default()
                },
                TierCatalog::default(),
            );
            let (scale, tier) = engine.size(&WorkloadDemand::new("w", traffic.clone())).unwrap();

            prop_assert!(scale.max_replicas >= 1);
            prop_assert!(scale.max_replicas <= cap);
            prop_assert!(scale.min_replicas <= scale.max_replicas);
            if traffic.idle_tolerant {
                prop_assert_eq!(scale.min_replicas, 0);
            }
            // covers peak unless capped
            let covered = u64::from(scale.max_replicas) * u64::from(traffic.per_replica_concurrency);
            prop_assert!(covered >= u64::from(traffic.peak_concurrent_requests) || scale.max_replicas == cap);

            // no cheaper tier would have fit
            prop_assert!(tier.max_concurrency >= traffic.per_replica_concurrency);
            for cheaper in engine.catalog().tiers().iter().filter(|t| t.monthly_rate < tier.monthly_rate) {
                prop_assert!(cheaper.max_concurrency < traffic.per_replica_concurrency);
            }
        }

        #[test]
        fn prop_projection_is_sum(demands in proptest::collection::vec(traffic(), 0..6), budget in 0u64..500, pct in 1u32..150) {
            let engine = engine(budget, pct);
            let demands: Vec<_> = demands
                .into_iter()
                .enumerate()
                .map(|(i, t)| WorkloadDemand::new(format!("w{i}"), t))
                .collect();
            let plan = engine.plan(&demands).unwrap();

            let sum: Usd = plan.workloads.iter().map(|p| p.monthly_cost).sum();
            prop_assert_eq!(plan.budget.current_projected, sum);

            let over = plan.budget.current_projected.cents() * 100
                > Usd::from_dollars(budget).cents() * u64::from(pct);
            prop_assert_eq!(plan.alert.is_some(), over);
        }

        #[test]
        fn prop_planned_cost_within_budget_when_feasible(
            demands in proptest::collection::vec(traffic(), 1..6),
            budget in 0u64..2_000,
        ) {
            let engine = engine(budget, 100);
            let demands: Vec<_> = demands
                .into_iter()
                .enumerate()
                .map(|(i, t)| WorkloadDemand::new(format!("w{i}"), t))
                .collect();
            let plan = engine.plan(&demands).unwrap();
            let share = Usd::from_dollars(budget).split(demands.len());

            // one replica of every chosen tier fits its share
            let feasible = plan.workloads.iter().all(|p| {
                let tier = engine.catalog().get(&p.scale.tier).unwrap();
                tier.monthly_rate <= share
            });
            if feasible {
                prop_assert!(plan.budget.current_projected <= Usd::from_dollars(budget));
                prop_assert!(plan.alert.is_none());
            }
            for p in &plan.workloads {
                prop_assert!(p.scale.max_replicas >= 1);
                prop_assert!(p.monthly_cost <= share || p.scale.max_replicas == 1);
            }
        }
    }
}
