//! SLO evaluation.
//!
//! Only upper-bound KPIs are supported: a KPI is violated when its value is
//! strictly greater than the SLO. Lower-bound KPIs (throughput floors and
//! the like) cannot be expressed.

use rlscale_core::{KpiDefinition, Metric};

/// Whether `metric` exceeds `slo`.
pub fn violated(metric: &Metric, slo: f64) -> bool {
    metric.value > slo
}

/// Whether any KPI measurement exceeds the SLO of the KPI with the same name.
///
/// Measurements without a matching definition are ignored.
pub fn any_violated(kpi_metrics: &[Metric], kpis: &[KpiDefinition]) -> bool {
    kpi_metrics.iter().any(|m| {
        kpis.iter()
            .find(|kpi| kpi.name == m.name)
            .is_some_and(|kpi| violated(m, kpi.slo))
    })
}
