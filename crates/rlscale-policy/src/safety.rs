//! Safety policy: a floor derived from recent healthy history.
//!
//! The policy keeps a ring of `period` buckets, one per interval. Each
//! healthy interval overwrites its bucket with the instance count that was
//! running at the time; violated intervals leave the bucket untouched. The
//! smallest recorded count across the ring, divided by `ratio`, is the
//! floor below which the app is never allowed to stay.

use rlscale_core::ScalingRequest;
use rlscale_core::config::SafetyConfig;
use tracing::{debug, info, warn};

use crate::error::PolicyError;
use crate::policy::{AppPolicy, PolicyInput, PolicyKind};
use crate::slo;

pub struct SafetyPolicy {
    app: String,
    /// Number of buckets; zero disables the policy.
    period: usize,
    ratio: f64,
    cursor: usize,
    buckets: Vec<Option<u32>>,
}

impl SafetyPolicy {
    /// Build the policy from raw settings, falling back to "disabled" for a
    /// bad period and to a ratio of 1 for a bad ratio.
    pub fn new(app: &str, config: &SafetyConfig) -> Self {
        let period = match config.period {
            None => {
                warn!(%app, "no safety period configured, safety policy disabled");
                0
            }
            Some(p) if p <= 0 => {
                warn!(%app, period = p, "unsupported safety period, safety policy disabled");
                0
            }
            Some(p) => p as usize,
        };
        let ratio = match config.ratio {
            None => {
                info!(%app, "no safety ratio configured, using 1");
                1.0
            }
            Some(r) if !(r > 0.0 && r <= 1.0) => {
                warn!(%app, ratio = r, "unsupported safety ratio, using 1");
                1.0
            }
            Some(r) => r,
        };
        Self {
            app: app.to_string(),
            period,
            ratio,
            cursor: 0,
            buckets: vec![None; period],
        }
    }

    pub fn is_active(&self) -> bool {
        self.period > 0
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Smallest recorded healthy count across all buckets, 0 if none yet.
    pub fn min_recorded(&self) -> u32 {
        self.buckets.iter().flatten().copied().min().unwrap_or(0)
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.period;
    }
}

impl AppPolicy for SafetyPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Safety
    }

    fn app(&self) -> &str {
        &self.app
    }

    fn propose(&mut self, input: &PolicyInput<'_>) -> Result<Option<ScalingRequest>, PolicyError> {
        if !self.is_active() {
            return Ok(None);
        }

        self.advance();
        if !slo::any_violated(input.kpi_metrics, input.kpis) {
            self.buckets[self.cursor] = Some(input.current_instances);
        }

        let min_instances = self.min_recorded();
        let target = (min_instances as f64 / self.ratio).floor() as i64;
        debug!(
            app = %self.app,
            bucket = self.cursor,
            min_instances,
            target,
            "safety floor computed"
        );

        if target > input.current_instances as i64 {
            info!(
                app = %self.app,
                current = input.current_instances,
                target,
                "safety policy: below historical floor, scaling up"
            );
            return Ok(Some(ScalingRequest::new(self.app.clone(), target)));
        }
        Ok(None)
    }
}
