//! Operator rule clamp.

use rlscale_core::{ScalingRequest, ScalingRule};
use tracing::info;

/// Bring `request` in line with the operator rules for its app.
///
/// Rules are checked in list order and the first violated one decides: the
/// request is moved to that rule's closest valid value and later rules are
/// not consulted, even if the new value violates them.
pub fn clamp_to_rules(request: ScalingRequest, rules: &[ScalingRule]) -> ScalingRequest {
    let violated = rules
        .iter()
        .filter(|rule| rule.app == request.app)
        .find(|rule| !rule.evaluate(request.instances));

    match violated {
        Some(rule) => {
            let clamped = rule.closest_valid_value();
            info!(
                app = %request.app,
                rule = %rule,
                requested = request.instances,
                clamped,
                "request violates rule, clamping"
            );
            ScalingRequest::new(request.app, clamped)
        }
        None => request,
    }
}
