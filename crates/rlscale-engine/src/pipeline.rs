//! Merge & constraint protocol: three proposal lists in, final commands out.
//!
//! ```text
//! proactive ─┐
//! reactive  ─┼─ merge (higher wins) ─ floor (≤0 → 1) ─ rules ─ rate limit ─ commands
//! safety    ─┘
//! ```

use std::collections::HashMap;

use rlscale_core::{AppName, ScalingRequest};
use rlscale_policy::PolicyKind;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ratelimit::RateLimiter;
use crate::rules::clamp_to_rules;
use crate::settings::SettingsSnapshot;

/// One interval's output of the three dispatchers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Proposals {
    pub proactive: Vec<ScalingRequest>,
    pub reactive: Vec<ScalingRequest>,
    pub safety: Vec<ScalingRequest>,
}

/// Merge the three lists into at most one request per app.
///
/// Proactive proposals form the base; reactive and then safety proposals
/// are folded in. A fold replaces an existing request only with a strictly
/// higher count, so no policy can pull another's proposal down.
pub fn merge(proposals: &Proposals) -> Vec<ScalingRequest> {
    let mut merged: Vec<ScalingRequest> = Vec::new();
    fold_in(&mut merged, &proposals.proactive, PolicyKind::Proactive);
    fold_in(&mut merged, &proposals.reactive, PolicyKind::Reactive);
    fold_in(&mut merged, &proposals.safety, PolicyKind::Safety);
    merged
}

fn fold_in(merged: &mut Vec<ScalingRequest>, overlay: &[ScalingRequest], kind: PolicyKind) {
    for request in overlay {
        match merged.iter_mut().find(|r| r.app == request.app) {
            Some(existing) if request.instances > existing.instances => {
                info!(
                    app = %request.app,
                    policy = %kind,
                    from = existing.instances,
                    to = request.instances,
                    "higher proposal overrides"
                );
                existing.instances = request.instances;
            }
            Some(existing) => {
                debug!(
                    app = %request.app,
                    policy = %kind,
                    proposed = request.instances,
                    kept = existing.instances,
                    "lower or equal proposal ignored"
                );
            }
            None => merged.push(request.clone()),
        }
    }
}

/// Rewrite every request for zero or fewer instances to exactly one.
pub fn apply_logical_floor(requests: Vec<ScalingRequest>) -> Vec<ScalingRequest> {
    requests
        .into_iter()
        .map(|r| {
            if r.instances <= 0 {
                debug!(app = %r.app, requested = r.instances, "raising request to one instance");
                ScalingRequest::new(r.app, 1)
            } else {
                r
            }
        })
        .collect()
}

/// Stateful part of the protocol: the rate limiter lives here so that the
/// rest of the pipeline stays a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct ConstraintPipeline {
    limiter: RateLimiter,
}

impl ConstraintPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run merge, floor, rule clamp and rate limiting.
    pub fn decide(
        &mut self,
        proposals: &Proposals,
        instances: &HashMap<AppName, u32>,
        settings: &SettingsSnapshot,
        now: Instant,
    ) -> Vec<ScalingRequest> {
        let merged = apply_logical_floor(merge(proposals));

        let mut commands = Vec::with_capacity(merged.len());
        for request in merged {
            let mut request = clamp_to_rules(request, &settings.rules);
            if request.instances < 1 {
                warn!(app = %request.app, requested = request.instances, "rule would remove every instance, keeping one");
                request.instances = 1;
            }
            let Some(&current) = instances.get(&request.app) else {
                warn!(app = %request.app, "no current instance count, dropping request");
                continue;
            };
            if let Some(command) =
                self.limiter
                    .admit(request, current, settings.upscale, settings.downscale, now)
            {
                commands.push(command);
            }
        }
        commands
    }
}
