//! Domain types shared by the policies, the decision engine and the
//! collaborators that feed them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a managed application, as used by the metrics backend.
pub type AppName = String;

// ── Measurements ───────────────────────────────────────────────────

/// A single (already aggregated) measurement.
///
/// `app` is `None` for raw readings that carry no app label; those are
/// dropped before they reach any policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub app: Option<AppName>,
}

impl Metric {
    /// A measurement scoped to `app`.
    pub fn new(name: impl Into<String>, value: f64, app: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            app: Some(app.into()),
        }
    }

    /// A measurement without app label.
    pub fn unscoped(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            app: None,
        }
    }

    /// Rename and re-scope a measurement (used for KPI queries whose result
    /// comes back under the raw query name).
    pub fn relabel(mut self, name: &str, app: &str) -> Self {
        self.name = name.to_string();
        self.app = Some(app.to_string());
        self
    }

    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }
}

/// A KPI an app is scaled on, with its service-level upper bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub name: String,
    pub slo: f64,
    /// Backend query used when no metric of this name is exported directly.
    #[serde(default)]
    pub query: Option<String>,
}

impl KpiDefinition {
    pub fn new(name: impl Into<String>, slo: f64) -> Self {
        Self {
            name: name.into(),
            slo,
            query: None,
        }
    }

    /// The query to issue for this KPI; defaults to the KPI name.
    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or(&self.name)
    }
}

// ── Scaling ────────────────────────────────────────────────────────

/// "This app should end up at `instances` instances."
///
/// Policies may produce non-positive counts; the engine clamps them before
/// anything reaches the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalingRequest {
    pub app: AppName,
    pub instances: i64,
}

impl ScalingRequest {
    pub fn new(app: impl Into<String>, instances: i64) -> Self {
        Self {
            app: app.into(),
            instances,
        }
    }
}

impl fmt::Display for ScalingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} instances", self.app, self.instances)
    }
}

/// Outcome of a scale command, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl ScalingResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

// ── Operator rules ─────────────────────────────────────────────────

/// Comparison used by a [`ScalingRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEqual,
}

impl Relation {
    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Less => "<",
            Relation::LessEqual => "<=",
            Relation::Greater => ">",
            Relation::GreaterEqual => ">=",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// An operator-defined hard bound on an app's instance count, e.g.
/// `frontend >= 2` or `worker < 10`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub app: AppName,
    pub relation: Relation,
    #[serde(rename = "value")]
    pub bound: i64,
}

impl ScalingRule {
    pub fn new(app: impl Into<String>, relation: Relation, bound: i64) -> Self {
        Self {
            app: app.into(),
            relation,
            bound,
        }
    }

    /// Whether `instances` satisfies this rule.
    pub fn evaluate(&self, instances: i64) -> bool {
        match self.relation {
            Relation::Less => instances < self.bound,
            Relation::LessEqual => instances <= self.bound,
            Relation::Greater => instances > self.bound,
            Relation::GreaterEqual => instances >= self.bound,
        }
    }

    /// The satisfying value closest to the bound.
    pub fn closest_valid_value(&self) -> i64 {
        match self.relation {
            Relation::Less => self.bound - 1,
            Relation::Greater => self.bound + 1,
            Relation::LessEqual | Relation::GreaterEqual => self.bound,
        }
    }
}

impl fmt::Display for ScalingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.app, self.relation, self.bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_evaluate_all_relations() {
        assert!(ScalingRule::new("a", Relation::Less, 5).evaluate(4));
        assert!(!ScalingRule::new("a", Relation::Less, 5).evaluate(5));
        assert!(ScalingRule::new("a", Relation::LessEqual, 5).evaluate(5));
        assert!(!ScalingRule::new("a", Relation::LessEqual, 5).evaluate(6));
        assert!(ScalingRule::new("a", Relation::Greater, 3).evaluate(4));
        assert!(!ScalingRule::new("a", Relation::Greater, 3).evaluate(3));
        assert!(ScalingRule::new("a", Relation::GreaterEqual, 3).evaluate(3));
        assert!(!ScalingRule::new("a", Relation::GreaterEqual, 3).evaluate(2));
    }

    #[test]
    fn rule_closest_valid_value() {
        assert_eq!(ScalingRule::new("a", Relation::Less, 5).closest_valid_value(), 4);
        assert_eq!(ScalingRule::new("a", Relation::LessEqual, 5).closest_valid_value(), 5);
        assert_eq!(ScalingRule::new("a", Relation::Greater, 3).closest_valid_value(), 4);
        assert_eq!(ScalingRule::new("a", Relation::GreaterEqual, 3).closest_valid_value(), 3);
    }

    #[test]
    fn rule_display_and_serde() {
        let rule: ScalingRule =
            toml::from_str("app = \"web\"\nrelation = \">=\"\nvalue = 2\n").unwrap();
        assert_eq!(rule, ScalingRule::new("web", Relation::GreaterEqual, 2));
        assert_eq!(rule.to_string(), "web >= 2");
    }

    #[test]
    fn kpi_query_defaults_to_name() {
        let mut kpi = KpiDefinition::new("latency", 200.0);
        assert_eq!(kpi.query(), "latency");
        kpi.query = Some("avg(http_latency)".to_string());
        assert_eq!(kpi.query(), "avg(http_latency)");
    }

    #[test]
    fn metric_relabel() {
        let m = Metric::unscoped("avg(x)", 3.0).relabel("x", "web");
        assert_eq!(m, Metric::new("x", 3.0, "web"));
        assert_eq!(m.app(), Some("web"));
    }
}
