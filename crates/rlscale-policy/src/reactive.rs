//! Reactive policy: linear interpolation on violated KPIs.

use rlscale_core::ScalingRequest;
use tracing::info;

use crate::error::PolicyError;
use crate::policy::{AppPolicy, PolicyInput, PolicyKind};
use crate::slo;

/// Scales up as soon as any KPI exceeds its SLO, by the ratio of the
/// measured value to the SLO. The most demanding KPI wins.
pub struct ReactivePolicy {
    app: String,
}

impl ReactivePolicy {
    pub fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
        }
    }
}

impl AppPolicy for ReactivePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Reactive
    }

    fn app(&self) -> &str {
        &self.app
    }

    fn propose(&mut self, input: &PolicyInput<'_>) -> Result<Option<ScalingRequest>, PolicyError> {
        if !slo::any_violated(input.kpi_metrics, input.kpis) {
            return Ok(None);
        }

        let current = input.current_instances;
        let mut decision: Option<(i64, &str, f64, f64)> = None;

        for m in input.kpi_metrics {
            let Some(kpi) = input.kpis.iter().find(|k| k.name == m.name) else {
                continue;
            };
            if !slo::violated(m, kpi.slo) {
                continue;
            }
            let target = linear_target(current, m.value, kpi.slo);
            if decision.is_none_or(|(best, ..)| target > best) {
                decision = Some((target, m.name.as_str(), m.value, kpi.slo));
            }
        }

        Ok(decision.map(|(target, kpi, value, slo)| {
            info!(
                app = %self.app,
                %kpi,
                value,
                slo,
                from = current,
                to = target,
                "reactive policy: KPI over SLO, scaling linearly"
            );
            ScalingRequest::new(self.app.clone(), target)
        }))
    }
}

/// `ceil(current * value / slo)`; only meaningful for `value > slo`.
fn linear_target(current: u32, value: f64, slo: f64) -> i64 {
    (current as f64 * (value / slo)).ceil() as i64
}
