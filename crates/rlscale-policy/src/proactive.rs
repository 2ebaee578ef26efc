//! Proactive policy: learned decisions with an explorative fallback.
//!
//! Without a model the policy probes whether the app can run with one
//! instance less: after enough consecutive healthy intervals it proposes
//! `current - 1`. A probe that is followed by an SLO violation makes the
//! next probe wait longer (exponential backoff); a probe that stays healthy
//! resets the wait.
//!
//! With a model the probe logic still runs every interval so its state stays
//! correct, and the model's choice wins unless the model is indifferent
//! (action 0) while a probe is due.

use std::sync::Arc;

use rlscale_core::{Metric, ScalingRequest};
use tracing::{debug, info};

use crate::error::PolicyError;
use crate::model::{ActionSpace, ModelProvider};
use crate::policy::{AppPolicy, PolicyInput, PolicyKind};
use crate::reward::{REWARD_METRIC, RewardFunction};
use crate::slo;

/// Healthy intervals to wait before the next explorative downscale.
pub const BACKOFF_TABLE: [u32; 4] = [1, 2, 4, 8];

pub struct ProactivePolicy {
    app: String,
    models: Arc<dyn ModelProvider>,
    reward: Arc<dyn RewardFunction>,
    actions: ActionSpace,
    healthy_intervals: u32,
    applied_downscale: bool,
    backoff_level: usize,
}

impl ProactivePolicy {
    pub fn new(app: &str, models: Arc<dyn ModelProvider>, reward: Arc<dyn RewardFunction>) -> Self {
        Self {
            app: app.to_string(),
            models,
            reward,
            actions: ActionSpace::default(),
            healthy_intervals: 0,
            applied_downscale: false,
            backoff_level: 0,
        }
    }

    pub fn backoff_level(&self) -> usize {
        self.backoff_level
    }

    pub fn healthy_intervals(&self) -> u32 {
        self.healthy_intervals
    }

    pub fn applied_downscale(&self) -> bool {
        self.applied_downscale
    }

    /// The model-independent probe logic.
    fn explore(&mut self, input: &PolicyInput<'_>) -> Result<Option<ScalingRequest>, PolicyError> {
        let probe_followed = self.applied_downscale && input.last_delta == Some(-1);

        if slo::any_violated(input.kpi_metrics, input.kpis) {
            self.healthy_intervals = 0;
            if probe_followed {
                info!(app = %self.app, "explorative downscale violated SLOs, backing off");
                self.back_off();
            }
            self.applied_downscale = false;
            return Ok(None);
        }

        if probe_followed {
            self.backoff_level = 0;
            debug!(app = %self.app, "explorative downscale held, backoff reset");
        }
        self.applied_downscale = false;
        self.healthy_intervals += 1;

        let wait = BACKOFF_TABLE
            .get(self.backoff_level)
            .copied()
            .ok_or(PolicyError::BackoffLevel {
                level: self.backoff_level,
                len: BACKOFF_TABLE.len(),
            })?;
        if self.healthy_intervals > wait {
            self.applied_downscale = true;
            let target = input.current_instances as i64 - 1;
            debug!(
                app = %self.app,
                healthy = self.healthy_intervals,
                wait,
                target,
                "explorative downscale due"
            );
            return Ok(Some(ScalingRequest::new(self.app.clone(), target)));
        }
        Ok(None)
    }

    fn back_off(&mut self) {
        let last = BACKOFF_TABLE.len() - 1;
        if self.backoff_level >= last {
            debug!(app = %self.app, wait = BACKOFF_TABLE[last], "backoff already at maximum");
            return;
        }
        self.backoff_level += 1;
        debug!(
            app = %self.app,
            wait = BACKOFF_TABLE[self.backoff_level],
            "backoff increased"
        );
    }

    /// Ask the model; `Ok(None)` means "no model" (it may have been removed
    /// since `is_trained` was checked).
    fn predict(&self, input: &PolicyInput<'_>) -> Result<Option<i64>, PolicyError> {
        let reward = self.reward.reward(
            input.current_instances as f64,
            input.kpi_metrics,
            input.kpis,
        );
        let mut state: Vec<Metric> = input.measurements.to_vec();
        state.push(Metric::new(REWARD_METRIC, reward, self.app.clone()));
        self.models
            .predict_best_action(&self.app, &state, &self.actions)
    }
}

impl AppPolicy for ProactivePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Proactive
    }

    fn app(&self) -> &str {
        &self.app
    }

    fn propose(&mut self, input: &PolicyInput<'_>) -> Result<Option<ScalingRequest>, PolicyError> {
        let explorative = self.explore(input)?;

        if !self.models.is_trained(&self.app) {
            debug!(app = %self.app, "no model yet, using default behavior");
            return Ok(explorative);
        }

        let Some(action) = self.predict(input)? else {
            return Ok(explorative);
        };
        let current = input.current_instances as i64;
        let target = current + action;
        info!(app = %self.app, action, target, "model predicted action");

        let model_proposal = (action != 0).then(|| ScalingRequest::new(self.app.clone(), target));

        match explorative {
            None => Ok(model_proposal),
            Some(probe) if target == current => {
                info!(app = %self.app, "model indifferent, applying explorative downscale");
                Ok(Some(probe))
            }
            Some(_) => Ok(model_proposal),
        }
    }
}
