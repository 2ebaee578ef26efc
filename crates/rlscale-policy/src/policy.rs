//! The single-app policy contract shared by all three policies.

use std::fmt;

use rlscale_core::{KpiDefinition, Metric, ScalingRequest};
use tracing::{info, warn};

use crate::error::PolicyError;

/// The three policy kinds, in ascending merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    Proactive,
    Reactive,
    Safety,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Proactive => "proactive",
            PolicyKind::Reactive => "reactive",
            PolicyKind::Safety => "safety",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a policy sees for one app in one interval.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub app: &'a str,
    /// All measurements of the app.
    pub measurements: &'a [Metric],
    /// The subset of `measurements` that are configured KPIs.
    pub kpi_metrics: &'a [Metric],
    pub kpis: &'a [KpiDefinition],
    pub current_instances: u32,
    /// Delta executed for this app at the end of the previous scaling
    /// interval; `None` when unknown.
    pub last_delta: Option<i64>,
}

/// A stateful policy bound to exactly one app.
pub trait AppPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    fn app(&self) -> &str;

    /// Produce zero or one proposal from a complete KPI set.
    fn propose(&mut self, input: &PolicyInput<'_>) -> Result<Option<ScalingRequest>, PolicyError>;

    /// Run the policy on one app's measurements.
    ///
    /// Extracts the configured KPIs from `measurements` and calls
    /// [`propose`](AppPolicy::propose) only when every one of them is
    /// present. A measurement tagged for another app is a contract breach.
    fn evaluate(
        &mut self,
        kpis: Option<&[KpiDefinition]>,
        measurements: &[Metric],
        current_instances: u32,
        last_delta: Option<i64>,
    ) -> Result<Option<ScalingRequest>, PolicyError> {
        let app = self.app().to_string();
        let kind = self.kind();

        let kpis = match kpis {
            Some(k) if !k.is_empty() => k,
            _ => {
                warn!(%app, policy = %kind, "no KPIs configured, ignoring app");
                return Ok(None);
            }
        };

        if let Some(foreign) = measurements.iter().find(|m| m.app() != Some(app.as_str())) {
            return Err(PolicyError::ForeignMeasurement {
                expected: app,
                found: foreign.app().unwrap_or("<none>").to_string(),
            });
        }

        let kpi_metrics: Vec<Metric> = measurements
            .iter()
            .filter(|m| kpis.iter().any(|kpi| kpi.name == m.name))
            .cloned()
            .collect();

        let missing: Vec<&str> = kpis
            .iter()
            .filter(|kpi| !kpi_metrics.iter().any(|m| m.name == kpi.name))
            .map(|kpi| kpi.name.as_str())
            .collect();
        if !missing.is_empty() {
            info!(
                %app,
                policy = %kind,
                expected = kpis.len(),
                missing = ?missing,
                "not all KPI measurements present, ignoring app"
            );
            return Ok(None);
        }

        self.propose(&PolicyInput {
            app: &app,
            measurements,
            kpi_metrics: &kpi_metrics,
            kpis,
            current_instances,
            last_delta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records what it was called with and always proposes current + 1.
    struct Probe {
        app: String,
        seen_kpis: usize,
    }

    impl AppPolicy for Probe {
        fn kind(&self) -> PolicyKind {
            PolicyKind::Reactive
        }

        fn app(&self) -> &str {
            &self.app
        }

        fn propose(
            &mut self,
            input: &PolicyInput<'_>,
        ) -> Result<Option<ScalingRequest>, PolicyError> {
            self.seen_kpis = input.kpi_metrics.len();
            Ok(Some(ScalingRequest::new(
                input.app,
                input.current_instances as i64 + 1,
            )))
        }
    }

    fn probe() -> Probe {
        Probe {
            app: "web".to_string(),
            seen_kpis: 0,
        }
    }

    fn kpis() -> Vec<KpiDefinition> {
        vec![
            KpiDefinition::new("latency", 100.0),
            KpiDefinition::new("errors", 0.1),
        ]
    }

    #[test]
    fn delegates_with_kpi_subset() {
        let mut p = probe();
        let measurements = vec![
            Metric::new("latency", 50.0, "web"),
            Metric::new("cpu", 0.4, "web"),
            Metric::new("errors", 0.0, "web"),
        ];
        let out = p.evaluate(Some(&kpis()), &measurements, 3, None).unwrap();
        assert_eq!(out, Some(ScalingRequest::new("web", 4)));
        assert_eq!(p.seen_kpis, 2);
    }

    #[test]
    fn missing_kpi_fails_closed() {
        let mut p = probe();
        let measurements = vec![Metric::new("latency", 500.0, "web")];
        let out = p.evaluate(Some(&kpis()), &measurements, 3, None).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn unconfigured_app_yields_nothing() {
        let mut p = probe();
        let measurements = vec![Metric::new("latency", 500.0, "web")];
        assert_eq!(p.evaluate(None, &measurements, 3, None).unwrap(), None);
        assert_eq!(p.evaluate(Some(&[]), &measurements, 3, None).unwrap(), None);
    }

    #[test]
    fn foreign_measurement_is_an_error() {
        let mut p = probe();
        let measurements = vec![
            Metric::new("latency", 50.0, "web"),
            Metric::new("errors", 0.0, "db"),
        ];
        let err = p
            .evaluate(Some(&kpis()), &measurements, 3, None)
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::ForeignMeasurement { ref expected, ref found }
                if expected == "web" && found == "db"
        ));
    }

    #[test]
    fn kinds_order_by_priority() {
        assert!(PolicyKind::Proactive < PolicyKind::Reactive);
        assert!(PolicyKind::Reactive < PolicyKind::Safety);
        assert_eq!(PolicyKind::Safety.to_string(), "safety");
    }
}
