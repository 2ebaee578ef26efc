//! Operator settings that may change while the loop runs.

use std::sync::{Arc, PoisonError, RwLock};

use rlscale_core::config::{AutoscalerConfig, RateLimitConfig};
use rlscale_core::ScalingRule;

/// A consistent copy of the live settings, taken once per scaling interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub rules: Vec<ScalingRule>,
    pub upscale: RateLimitConfig,
    pub downscale: RateLimitConfig,
}

/// Shared handle to the rule list and the two rate-limit pairs.
///
/// Everything else in the configuration is fixed at startup.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    inner: Arc<RwLock<SettingsSnapshot>>,
}

impl LiveSettings {
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn from_config(config: &AutoscalerConfig) -> Self {
        Self::new(SettingsSnapshot {
            rules: config.rules.clone(),
            upscale: config.scaling.upscale,
            downscale: config.scaling.downscale,
        })
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rules(&self) -> Vec<ScalingRule> {
        self.snapshot().rules
    }

    pub fn set_rules(&self, rules: Vec<ScalingRule>) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).rules = rules;
    }

    /// Append a rule; it is checked after all existing rules for its app.
    pub fn add_rule(&self, rule: ScalingRule) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .push(rule);
    }

    /// Drop every rule for `app`, returning how many were removed.
    pub fn remove_rules_for(&self, app: &str) -> usize {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.rules.len();
        guard.rules.retain(|r| r.app != app);
        before - guard.rules.len()
    }

    pub fn upscale(&self) -> RateLimitConfig {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).upscale
    }

    pub fn set_upscale(&self, limit: RateLimitConfig) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).upscale = limit;
    }

    pub fn downscale(&self) -> RateLimitConfig {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).downscale
    }

    pub fn set_downscale(&self, limit: RateLimitConfig) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).downscale = limit;
    }

    /// The editable entries as `key = value` lines, rules last.
    pub fn render_editable(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        out.push_str(&format!("scaling.upscale.timeout_secs = {}\n", s.upscale.timeout_secs));
        out.push_str(&format!("scaling.upscale.limit = {}\n", s.upscale.limit));
        out.push_str(&format!("scaling.downscale.timeout_secs = {}\n", s.downscale.timeout_secs));
        out.push_str(&format!("scaling.downscale.limit = {}\n", s.downscale.limit));
        for (i, rule) in s.rules.iter().enumerate() {
            out.push_str(&format!("rules.{i} = \"{rule}\"\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlscale_core::Relation;

    fn settings() -> LiveSettings {
        LiveSettings::new(SettingsSnapshot {
            rules: vec![ScalingRule::new("web", Relation::GreaterEqual, 2)],
            upscale: RateLimitConfig { timeout_secs: 60, limit: 2 },
            downscale: RateLimitConfig { timeout_secs: 120, limit: 1 },
        })
    }

    #[test]
    fn writes_are_visible_through_clones() {
        let live = settings();
        let admin = live.clone();
        admin.set_upscale(RateLimitConfig { timeout_secs: 30, limit: 4 });
        admin.add_rule(ScalingRule::new("web", Relation::LessEqual, 10));
        assert_eq!(live.upscale().limit, 4);
        assert_eq!(live.rules().len(), 2);
        assert_eq!(admin.remove_rules_for("web"), 2);
        assert!(live.rules().is_empty());
    }

    #[test]
    fn renders_editable_entries() {
        let text = settings().render_editable();
        assert!(text.contains("scaling.upscale.limit = 2\n"));
        assert!(text.contains("scaling.downscale.timeout_secs = 120\n"));
        assert!(text.contains("rules.0 = \"web >= 2\"\n"));
    }
}
