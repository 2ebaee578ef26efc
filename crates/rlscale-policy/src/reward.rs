//! Reward functions appended to the model state as the `Reward` feature.

use rlscale_core::{KpiDefinition, Metric};

/// Name under which the reward is appended to a model's input state.
pub const REWARD_METRIC: &str = "Reward";

/// Value of a state, from the instance count and how far the KPIs are
/// from their SLOs. Higher is better.
pub trait RewardFunction: Send + Sync {
    fn reward(&self, instances: f64, kpi_metrics: &[Metric], kpis: &[KpiDefinition]) -> f64;
}

/// Blend of normalised instance cost and a saturating SLO penalty,
/// averaged over the KPIs that were found.
#[derive(Debug, Clone, Copy)]
pub struct ImprovedReward {
    pub max_instances: f64,
    /// Share of the penalty attributed to SLO violation (the rest is cost).
    pub weight: f64,
    pub steepness: f64,
}

impl Default for ImprovedReward {
    fn default() -> Self {
        Self {
            max_instances: 10.0,
            weight: 0.9,
            steepness: 2.0,
        }
    }
}

impl ImprovedReward {
    fn reward_of_one(&self, instances: f64, value: f64, slo: f64) -> f64 {
        let cost = instances / self.max_instances;
        // 0 while the KPI holds, approaching 1 as it overshoots.
        let overshoot = (value / slo - 1.0).max(0.0);
        let violation = (self.steepness * overshoot) / (self.steepness * overshoot + 1.0);
        -((1.0 - self.weight) * cost + self.weight * violation)
    }
}

impl RewardFunction for ImprovedReward {
    fn reward(&self, instances: f64, kpi_metrics: &[Metric], kpis: &[KpiDefinition]) -> f64 {
        let mut total = 0.0;
        let mut found = 0usize;
        for m in kpi_metrics {
            if let Some(kpi) = kpis.iter().find(|k| k.name == m.name) {
                total += self.reward_of_one(instances, m.value, kpi.slo);
                found += 1;
            }
        }
        if found == 0 {
            return 0.0;
        }
        total / found as f64
    }
}

/// Negative instance count, multiplied by `value / slo` for violated KPIs,
/// summed over KPIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleReward;

impl RewardFunction for SimpleReward {
    fn reward(&self, instances: f64, kpi_metrics: &[Metric], kpis: &[KpiDefinition]) -> f64 {
        kpi_metrics
            .iter()
            .filter_map(|m| {
                kpis.iter().find(|k| k.name == m.name).map(|kpi| {
                    if m.value <= kpi.slo {
                        -instances
                    } else {
                        (m.value / kpi.slo) * -instances
                    }
                })
            })
            .sum()
    }
}
