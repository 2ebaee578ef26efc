//! Policy dispatcher: one policy instance per app, fed by app.

use std::collections::{BTreeMap, HashMap};

use rlscale_core::{AppName, KpiDefinition, Metric, ScalingRequest};
use tracing::{debug, error, trace};

use crate::error::PolicyError;
use crate::policy::{AppPolicy, PolicyKind};

/// Builds the policy instance for an app the first time it is seen.
pub type PolicyFactory<P> = Box<dyn Fn(&str) -> P + Send + Sync>;

/// A policy instance that breached its contract and was discarded.
#[derive(Debug)]
pub struct PolicyFailure {
    pub app: AppName,
    pub kind: PolicyKind,
    pub error: PolicyError,
}

/// Result of one dispatch round.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub proposals: Vec<ScalingRequest>,
    pub failures: Vec<PolicyFailure>,
}

/// Fans measurements out by app to per-app instances of one policy kind.
///
/// Instances are created lazily and live until they fail; a failed instance
/// is dropped and rebuilt fresh the next time its app shows up.
pub struct PolicyDispatcher<P: AppPolicy> {
    kind: PolicyKind,
    kpis: BTreeMap<AppName, Vec<KpiDefinition>>,
    make: PolicyFactory<P>,
    policies: HashMap<AppName, P>,
}

impl<P: AppPolicy> PolicyDispatcher<P> {
    pub fn new(
        kind: PolicyKind,
        kpis: BTreeMap<AppName, Vec<KpiDefinition>>,
        make: PolicyFactory<P>,
    ) -> Self {
        Self {
            kind,
            kpis,
            make,
            policies: HashMap::new(),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// The live instance for `app`, if one has been created.
    pub fn policy(&self, app: &str) -> Option<&P> {
        self.policies.get(app)
    }

    /// Run every app's policy on its share of `measurements`.
    ///
    /// Measurements without app are dropped. Apps whose current instance
    /// count is unknown are skipped. Output is ordered by app name.
    pub fn dispatch(
        &mut self,
        measurements: &[Metric],
        instances: &HashMap<AppName, u32>,
        last_actions: &HashMap<AppName, i64>,
    ) -> DispatchOutcome {
        let mut by_app: BTreeMap<&str, Vec<Metric>> = BTreeMap::new();
        for m in measurements {
            match m.app() {
                Some(app) => by_app.entry(app).or_default().push(m.clone()),
                None => trace!(metric = %m.name, "dropping measurement without app"),
            }
        }

        let mut outcome = DispatchOutcome::default();
        for (app, app_measurements) in by_app {
            let Some(&current) = instances.get(app) else {
                debug!(%app, policy = %self.kind, "instance count unknown, skipping app");
                continue;
            };

            let policy = self
                .policies
                .entry(app.to_string())
                .or_insert_with(|| (self.make)(app));
            let kpis = self.kpis.get(app).map(Vec::as_slice);
            let last_delta = last_actions.get(app).copied();

            match policy.evaluate(kpis, &app_measurements, current, last_delta) {
                Ok(Some(request)) => outcome.proposals.push(request),
                Ok(None) => {}
                Err(e) => {
                    error!(%app, policy = %self.kind, error = %e, "policy contract violated, discarding instance");
                    self.policies.remove(app);
                    outcome.failures.push(PolicyFailure {
                        app: app.to_string(),
                        kind: self.kind,
                        error: e,
                    });
                }
            }
        }
        outcome
    }
}
